//! Input byte sources.

use std::path::Path;

use bedek_common::Result;

/// A raw source handed over by the upload collaborator: the bytes plus
/// whatever hints arrived with them. Neither hint is trusted blindly;
/// format detection falls back to sniffing the content.
#[derive(Debug, Clone)]
pub struct ByteSource {
    pub data: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl ByteSource {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            filename: None,
            content_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file into a source, keeping the file name as a hint.
    pub async fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self {
            data,
            filename,
            content_type: None,
        })
    }

    /// Lower-cased file extension from the filename hint, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_is_lowercased() {
        let source = ByteSource::from_bytes(vec![]).with_filename("Permits.XLSX");
        assert_eq!(source.extension().as_deref(), Some("xlsx"));
    }

    #[test]
    fn test_extension_absent() {
        assert_eq!(ByteSource::from_bytes(vec![]).extension(), None);
        let no_ext = ByteSource::from_bytes(vec![]).with_filename("README");
        assert_eq!(no_ext.extension(), None);
        let trailing_dot = ByteSource::from_bytes(vec![]).with_filename("data.");
        assert_eq!(trailing_dot.extension(), None);
    }

    #[tokio::test]
    async fn test_read_file_keeps_filename() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a,b\n1,2\n").unwrap();
        let source = ByteSource::read_file(file.path()).await.unwrap();
        assert_eq!(source.data, b"a,b\n1,2\n");
        assert!(source.filename.is_some());
    }
}
