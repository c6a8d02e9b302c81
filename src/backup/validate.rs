//! Custom validators used with `#[validate(custom(...))]` and when editing settings.

use chrono::Local;
use std::path::Path;
use validator::ValidationError;

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }
    if !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
        return Ok(());
    }

    std::fs::create_dir_all(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot create directory {:?}: {}", dir, e).into())
    })
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Local::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_exist() {
        let dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(dir.path()).is_ok());
        assert!(validate_dir_exist(dir.path().join("missing")).is_err());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
    }

    #[test]
    fn test_dir_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());
        assert!(validate_writable_dir(&nested).is_ok());
    }

    #[test]
    fn test_cron() {
        assert!(validate_cron_str("30 4 * * 2").is_ok());
        assert!(validate_cron_str("61 4 * * *").is_err());
    }
}
