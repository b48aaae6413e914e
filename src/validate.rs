use crate::config::Config;
use ansi_term::Colour::{Green, Red};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Every `*.yaml` / `*.yml` file under `target`, sorted.
pub fn yaml_files(target: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(target) {
        let entry = entry?;
        if entry.path().is_file() && is_yaml(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    Ok(files)
}

/// Validate a file, or every YAML file of a directory recursively.
pub fn validate_target(target: &Path) -> Result<()> {
    if !target.exists() {
        return Err(anyhow!(
            "{:?} ... {} - file/directory does not exist",
            target,
            Red.paint("Failed")
        ));
    }

    if target.is_dir() {
        let files = yaml_files(target)?;

        // Report every file before failing
        let mut invalid = 0;
        for file in &files {
            if let Err(e) = validate_file(file) {
                println!("{}", e);
                invalid += 1;
            }
        }

        if invalid > 0 {
            return Err(anyhow!("{} of {} files are invalid", invalid, files.len()));
        }
        return Ok(());
    }

    validate_file(target)
}

/// Validate one desired-state file without connecting anywhere.
pub fn validate_file(file: &Path) -> Result<()> {
    let config = Config::new(file)
        .map_err(|e| anyhow!("{:?} ... {} - {:#}", file, Red.paint("invalid"), e))?;

    println!(
        "{:?} ... {} ({} requests)",
        file,
        Green.paint("ok"),
        config.requests.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::fs;

    #[test]
    fn test_validate_directory() {
        let dir = tempfile::tempdir().unwrap();
        let valid = indoc! {"
            connection:
              type: postgres
              url: postgres://localhost:5432/postgres
            requests:
              - type: membership
                groups: [readonly]
                target_roles: [alice]
        "};
        fs::write(dir.path().join("a.yaml"), valid).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.yml"), valid).unwrap();
        fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        assert_eq!(yaml_files(dir.path()).unwrap().len(), 2);
        assert!(validate_target(dir.path()).is_ok());

        fs::write(dir.path().join("c.yaml"), "connection: {}").unwrap();
        let err = validate_target(dir.path()).unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 files are invalid");
    }

    #[test]
    fn test_validate_missing_target() {
        assert!(validate_target(Path::new("/tmp/pgrole-file-not-found")).is_err());
    }
}
