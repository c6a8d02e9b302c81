use backup_quest::backup::app_config::AppConfig;
use backup_quest::backup::archive::progress::{format_size, ProgressEvent};
use backup_quest::backup::cloud::CloudDrive;
use backup_quest::backup::options::BackupOptions;
use backup_quest::backup::orchestrator::BackupOrchestrator;
use backup_quest::backup::result_error::error::Error;
use backup_quest::backup::result_error::result::Result;
use backup_quest::backup::retention::RetentionPolicy;
use backup_quest::backup::schedule::job::{storage_for, BackupJob};
use backup_quest::backup::schedule::scheduler::Scheduler;
use backup_quest::backup::schedule::{ScheduleRule, StoredSchedule};
use backup_quest::backup::settings::{SettingsExt, SettingsKey, SettingsStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Back up World of Warcraft add-ons and settings
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of the YAML config file
    #[arg(short, long, env = "BACKUP_QUEST_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup now
    Backup,
    /// Overwrite Interface and WTF with a backup
    Restore { locator: String },
    /// List backups of the configured game version, newest first
    List,
    /// Delete one backup
    Delete { locator: String },
    /// Delete the oldest backups beyond the configured limit
    Prune,
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Run the saved schedule until stopped
    Daemon,
    #[command(subcommand)]
    Auth(AuthCommand),
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    /// Save a daily or weekly schedule
    Set {
        #[arg(long)]
        frequency: String,
        /// Local time, HH:MM
        #[arg(long, default_value = "00:00")]
        time: String,
        /// Day of week for weekly schedules, 0 is Sunday
        #[arg(long)]
        day: Option<u8>,
    },
    Show,
    Clear,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Print the sign-in url
    Url,
    /// Exchange the code shown after sign-in
    Login { code: String },
    Status,
    Logout,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Get { key: Option<String> },
    Set { key: String, value: String },
    Unset { key: String },
}

struct App {
    config: AppConfig,
    settings: Arc<dyn SettingsStore>,
    drive: Option<Arc<dyn CloudDrive>>,
}

impl App {
    fn new(config: AppConfig) -> Result<Self> {
        let settings = config.open_settings()?;
        let drive = config.drive(settings.clone())?;
        Ok(Self {
            config,
            settings,
            drive,
        })
    }

    fn drive(&self) -> Result<&Arc<dyn CloudDrive>> {
        self.drive
            .as_ref()
            .ok_or_else(|| Error::configuration("No `google` section in the config file"))
    }

    fn orchestrator(&self) -> Result<(BackupOptions, BackupOrchestrator)> {
        let options = BackupOptions::from_settings(self.settings.as_ref())?;
        let orchestrator = BackupOrchestrator::builder()
            .storage(storage_for(&options, self.drive.as_ref())?)
            .retention(RetentionPolicy::from_settings(self.settings.as_ref())?)
            .scratch_dir(self.config.scratch_dir.clone())
            .build();
        Ok((options, orchestrator))
    }

    fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Backup => {
                let (options, orchestrator) = self.orchestrator()?;
                let locator = orchestrator.create_backup(&options, &mut print_progress)?;
                println!("Backup created: {locator}");
            }
            Command::Restore { locator } => {
                let (options, orchestrator) = self.orchestrator()?;
                orchestrator.restore_backup(&options, &locator, &mut print_progress)?;
                println!("Restored {locator}");
            }
            Command::List => {
                let (options, orchestrator) = self.orchestrator()?;
                let records = orchestrator.list_backups(&options)?;
                if records.is_empty() {
                    println!("No {} backups found", options.version);
                }
                for record in records {
                    println!(
                        "{}  {:>10}  {}  {}",
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        format_size(record.size_bytes),
                        record.name,
                        record.locator
                    );
                }
            }
            Command::Delete { locator } => {
                let (_, orchestrator) = self.orchestrator()?;
                orchestrator.delete_backup(&locator)?;
                println!("Deleted {locator}");
            }
            Command::Prune => {
                let (options, orchestrator) = self.orchestrator()?;
                let report = orchestrator.apply_retention(&options)?;
                for record in &report.deleted {
                    println!("Deleted {}", record.name);
                }
                for (record, e) in &report.failed {
                    println!("Could not delete {}: {e}", record.name);
                }
            }
            Command::Schedule(command) => self.schedule(command)?,
            Command::Daemon => self.daemon()?,
            Command::Auth(command) => self.auth(command)?,
            Command::Config(command) => self.edit_settings(command)?,
        }
        Ok(())
    }

    fn schedule(&self, command: ScheduleCommand) -> Result<()> {
        match command {
            ScheduleCommand::Set {
                frequency,
                time,
                day,
            } => {
                let rule = ScheduleRule::parse(&frequency, &time, day)?;
                self.settings
                    .set_as(SettingsKey::Schedule, &StoredSchedule::from(&rule))?;
                println!(
                    "Saved {} schedule at {} ({}). Run `daemon` to start it.",
                    rule.frequency,
                    rule.time(),
                    rule.to_cron()
                );
            }
            ScheduleCommand::Show => match self.settings.get_as::<StoredSchedule>(SettingsKey::Schedule)? {
                Some(stored) => {
                    let rule = ScheduleRule::try_from(&stored)?;
                    println!("{} at {} ({})", rule.frequency, rule.time(), rule.to_cron());
                }
                None => println!("No schedule"),
            },
            ScheduleCommand::Clear => {
                self.settings.delete(SettingsKey::Schedule)?;
                println!("Schedule cleared");
            }
        }
        Ok(())
    }

    fn daemon(&self) -> Result<()> {
        let stored: StoredSchedule = self
            .settings
            .get_as(SettingsKey::Schedule)?
            .ok_or_else(|| Error::configuration("No schedule saved, use `schedule set` first"))?;
        let rule = ScheduleRule::try_from(&stored)?;

        let job = BackupJob::builder()
            .settings(self.settings.clone())
            .maybe_drive(self.drive.clone())
            .scratch_dir(self.config.scratch_dir.clone())
            .notifier(self.config.notifier())
            .build();
        let mut scheduler = Scheduler::new(Arc::new(job));
        scheduler.set_schedule(&rule)?;
        tracing::info!("Daemon started");
        scheduler.wait();
        Ok(())
    }

    fn auth(&self, command: AuthCommand) -> Result<()> {
        let drive = self.drive()?;
        match command {
            AuthCommand::Url => println!("{}", drive.auth_url()?),
            AuthCommand::Login { code } => {
                drive.exchange_code(&code)?;
                println!("Signed in to {}", drive.provider());
            }
            AuthCommand::Status => {
                if drive.is_authenticated() {
                    println!("Signed in to {}", drive.provider());
                } else {
                    println!("Not signed in to {}", drive.provider());
                }
            }
            AuthCommand::Logout => {
                drive.logout()?;
                println!("Signed out of {}", drive.provider());
            }
        }
        Ok(())
    }

    fn edit_settings(&self, command: ConfigCommand) -> Result<()> {
        match command {
            ConfigCommand::Get { key: Some(key) } => {
                let key = SettingsKey::parse(&key)?;
                println!("{}", display_value(key, self.settings.get(key)?));
            }
            ConfigCommand::Get { key: None } => {
                for key in SettingsKey::ALL {
                    println!("{key} = {}", display_value(key, self.settings.get(key)?));
                }
            }
            ConfigCommand::Set { key, value } => {
                let key = SettingsKey::parse(&key)?;
                self.settings.set(key, key.parse_value(&value)?)?;
            }
            ConfigCommand::Unset { key } => {
                self.settings.delete(SettingsKey::parse(&key)?)?;
            }
        }
        Ok(())
    }
}

fn display_value(key: SettingsKey, value: Option<serde_json::Value>) -> String {
    match (key, value) {
        (_, None) => "<unset>".to_string(),
        (SettingsKey::GoogleTokens, Some(_)) => "<saved>".to_string(),
        (_, Some(serde_json::Value::String(s))) => s,
        (_, Some(v)) => v.to_string(),
    }
}

fn print_progress(event: ProgressEvent) {
    println!("{:5.1}% {}", event.percent, event.message);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let res = AppConfig::load_or_default(args.config.as_deref())
        .and_then(App::new)
        .and_then(|app| app.run(args.command));

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
