//! Secrets read from the config file: the OAuth client secret and the SMTP password.
//!
//! [`RedactedString`] never prints or serializes its content and is wiped on drop.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::Validate;
use zeroize::Zeroize;

pub static REDACTED: &str = "<redacted>";

#[derive(Validate, Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[validate(length(min = 1))]
    #[builder(into)]
    inner: String,
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(SecretVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

struct SecretVisitor;

impl Visitor<'_> for SecretVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a secret string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::builder().inner(v).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_never_leaks() {
        let secret: RedactedString = serde_yml::from_str("GOCSPX-abcdef").unwrap();
        assert_eq!(secret.inner(), "GOCSPX-abcdef");
        assert_eq!(format!("{secret:?}"), REDACTED);
        assert_eq!(serde_json::to_string(&secret).unwrap(), format!("\"{REDACTED}\""));
    }

    #[test]
    fn test_empty_secret_is_invalid() {
        assert!(RedactedString::builder().inner("").build().validate().is_err());
        assert!(RedactedString::builder().inner("x").build().validate().is_ok());
    }

    #[test]
    fn test_zeroize_clears_content() {
        let mut secret = RedactedString::builder().inner("hunter22").build();
        secret.zeroize();
        assert!(secret.inner().is_empty());
    }
}
