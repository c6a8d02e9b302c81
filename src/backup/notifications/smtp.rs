use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::notifications::Notification;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Mails scheduled backup events through an SMTP relay.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[validate(nested)]
    #[builder(into)]
    password: RedactedString,
}

/// `Unsecured` is plain text and only meant for local relays.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl SmtpNotificationConfig {
    /// Splits an optional `:port` suffix off `host`.
    fn host_and_port(&self) -> (&str, Option<u16>) {
        match self.host.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (self.host.as_str(), None),
            },
            None => (self.host.as_str(), None),
        }
    }
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn send(&self, topic: &str, msg: &str) -> Result<()> {
        tracing::info!("Mailing {:?} from {:?} to {:?}", topic, self.from, self.to);
        let email = self
            .to
            .iter()
            .fold(Message::builder(), |email, send_to| {
                email.to(send_to.clone())
            })
            .from(self.from.clone())
            .subject(topic)
            .header(ContentType::TEXT_PLAIN)
            .body(msg.to_string())
            .map_err(Error::from)
            .add_msg(format!(
                "Building notification email from {:?} to {:?} failed",
                self.from, self.to
            ))
            .add_fn_name(function_path!())?;

        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let (host, port) = self.host_and_port();
        let mut mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(host)),
            SmtpMode::Ssl => SmtpTransport::relay(host),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(host),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Building smtp client for {:?} in mode {:?} failed",
            self.host, self.smtp_mode
        ))
        .add_fn_name(function_path!())?
        .credentials(creds);
        if let Some(port) = port {
            mailer = mailer.port(port);
        }
        let mailer = mailer.build();

        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            tracing::info!("Notification mailed");
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::smtp_send_error(m.to_owned()))
                .collect_vec();
            Err(Error::lots_of_error(error_vec))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::notifications::{NotificationConfig, NotificationSink, ScheduleEvent};

    fn config(host: String, mode: SmtpMode, to: Vec<Mailbox>, password: &str) -> SmtpNotificationConfig {
        SmtpNotificationConfig::builder()
            .host(host)
            .smtp_mode(mode)
            .from("WoW Backups <backups@example.com>".parse::<Mailbox>().unwrap())
            .to(to)
            .username("backups")
            .password(RedactedString::builder().inner(password).build())
            .build()
    }

    #[test]
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn test_error_event_is_mailed() {
        if std::env::var("CI").is_ok() {
            return;
        }

        let server = maik::MockServer::builder().no_verify_credentials().build();
        let smtp = config(
            format!("{}:{}", server.host(), server.port()),
            SmtpMode::Unsecured,
            vec!["raider@example.com".parse().unwrap()],
            "app-password",
        );
        server.start();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let result = smtp.send("Scheduled WoW backup: error", "Backup failed: disk full");
        std::thread::sleep(std::time::Duration::from_millis(200));

        if result.is_ok() {
            let assertion = maik::MailAssertion::new()
                .recipients_are(["raider@example.com"])
                .body_is("Backup failed: disk full");
            assert!(server.assert(assertion));
        }

        // Sink failures are logged, never raised.
        let unreachable = NotificationConfig::from(config(
            "127.0.0.1:1".to_string(),
            SmtpMode::Unsecured,
            vec!["raider@example.com".parse().unwrap()],
            "app-password",
        ));
        unreachable.event(ScheduleEvent::Error, "still fine");
    }

    #[test]
    fn test_validation() {
        let recipients = || vec!["raider@example.com".parse::<Mailbox>().unwrap()];
        assert!(config("smtp.example.com".into(), SmtpMode::Ssl, recipients(), "pw")
            .validate()
            .is_ok());
        assert!(config("smtp.example.com".into(), SmtpMode::Ssl, vec![], "pw")
            .validate()
            .is_err());
        assert!(config("smtp.example.com".into(), SmtpMode::StartTls, recipients(), "")
            .validate()
            .is_err());
    }

    #[test]
    fn test_host_and_port() {
        let recipients = vec!["raider@example.com".parse::<Mailbox>().unwrap()];
        let with_port = config("localhost:2525".into(), SmtpMode::Unsecured, recipients.clone(), "pw");
        assert_eq!(with_port.host_and_port(), ("localhost", Some(2525)));
        let without = config("smtp.example.com".into(), SmtpMode::Ssl, recipients, "pw");
        assert_eq!(without.host_and_port(), ("smtp.example.com", None));
    }

    #[test]
    fn test_password_not_serialized() {
        let smtp = config(
            "smtp.example.com".into(),
            SmtpMode::StartTls,
            vec!["raider@example.com".parse().unwrap()],
            "app-password",
        );
        let yaml = serde_yml::to_string(&smtp).unwrap();
        assert!(!yaml.contains("app-password"));
        assert!(yaml.contains("StartTls"));
    }
}
