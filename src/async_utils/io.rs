//! I/O utilities.
//!
//! This module is responsible for reading JSON and TOML config files, and for
//! reading and writing our CSV tables. CSV files are written to a temporary
//! file next to the target and then renamed into place, so an interrupted run
//! never leaves a half-written table behind.

use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _},
};

use crate::prelude::*;

/// Read TOML or JSON from a file. Files ending in `.json`, or starting with
/// `{`, are parsed as JSON.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    // Read all at once because our parsing libraries don't do async I/O.
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    let is_json_like = path.extension().is_some_and(|ext| ext == "json")
        || data.trim_start().starts_with('{');
    if is_json_like {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write `text` to a file or stdout.
pub async fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    let mut wtr = create_writer(path).await?;
    wtr.write_all(text.as_bytes())
        .await
        .context("failed to write output")?;
    wtr.flush().await.context("failed to flush output")?;
    Ok(())
}

/// Read every row of a CSV file with headers.
pub fn read_csv<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {:?}", path))?;
    rdr.deserialize()
        .enumerate()
        .map(|(idx, row)| {
            row.with_context(|| {
                format!("Failed to read CSV row {} from {:?}", idx + 2, path)
            })
        })
        .collect()
}

/// Atomically replace `path` with a CSV file containing `rows`.
pub fn write_csv_atomic<T, I>(path: &Path, rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir).with_context(|| {
        format!("Failed to create temporary file in {:?}", dir.display())
    })?;
    {
        let mut wtr = csv::Writer::from_writer(tmp.as_file());
        for row in rows {
            wtr.serialize(row)
                .with_context(|| format!("Failed to write CSV row to {:?}", path))?;
        }
        wtr.flush()
            .with_context(|| format!("Failed to flush CSV file {:?}", path))?;
    }
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Row {
        id: u32,
        text: Option<String>,
    }

    #[test]
    fn csv_round_trip_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, "old contents").unwrap();

        let rows = vec![
            Row {
                id: 1,
                text: Some("এক".to_owned()),
            },
            Row { id: 2, text: None },
        ];
        write_csv_atomic(&path, &rows).unwrap();
        let read_back: Vec<Row> = read_csv(&path).unwrap();
        assert_eq!(read_back, rows);

        // Only our file should be left in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn reads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "id = 3\ntext = \"x\"\n").unwrap();
        let row: Row = read_json_or_toml(&toml_path).await.unwrap();
        assert_eq!(row.id, 3);

        let json_path = dir.path().join("config.conf");
        std::fs::write(&json_path, r#"{"id": 4, "text": null}"#).unwrap();
        let row: Row = read_json_or_toml(&json_path).await.unwrap();
        assert_eq!(row, Row { id: 4, text: None });
    }
}
