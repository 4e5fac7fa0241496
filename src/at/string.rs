use crate::error::{MeshError, Result};

use super::AtValue;

/// A text parameter such as the node identifier.
///
/// Carried as raw UTF-8 with no terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtString(pub String);

impl AtString {
    /// Create a new string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The value as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AtString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for AtString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AtValue for AtString {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        std::str::from_utf8(data)
            .map(Self::new)
            .map_err(|e| MeshError::malformed(format!("string: {e}")))
    }
}

/// Split a NUL-terminated string off the front of `data`.
///
/// Returns the string and the bytes after the terminator.
pub(crate) fn split_cstr<'a>(what: &str, data: &'a [u8]) -> Result<(&'a str, &'a [u8])> {
    let nul = data
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| MeshError::malformed(format!("{what}: missing NUL terminator")))?;
    let text = std::str::from_utf8(&data[..nul])
        .map_err(|e| MeshError::malformed(format!("{what}: {e}")))?;
    Ok((text, &data[nul + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_value() {
        let value = AtString::new("1|2|3");
        assert_eq!(value.to_bytes().unwrap(), b"1|2|3".to_vec());
        assert_eq!(AtString::from_bytes(b"-").unwrap().as_str(), "-");
        assert!(AtString::from_bytes(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_split_cstr() {
        let (name, rest) = split_cstr("name", b"Vehicle\0\x00\x00\x00\x07").unwrap();
        assert_eq!(name, "Vehicle");
        assert_eq!(rest, &[0, 0, 0, 7]);

        let (name, rest) = split_cstr("name", b"\0").unwrap();
        assert_eq!(name, "");
        assert!(rest.is_empty());

        assert!(matches!(
            split_cstr("name", b"Vehicle"),
            Err(MeshError::MalformedFrame(_))
        ));
    }
}
