//! Inline button payloads.
//!
//! A download button carries `dl:<resolution-id>:<index>`. The resolution id
//! lets a press on an old message be told apart from one on the current
//! result, since the session only keeps the latest lookup.

const PREFIX: &str = "dl";

/// Bot API limit on `callback_data`.
const MAX_CALLBACK_DATA_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSelection {
    pub resolution_id: String,
    pub index: usize,
}

impl DownloadSelection {
    pub fn new(resolution_id: impl Into<String>, index: usize) -> Self {
        Self {
            resolution_id: resolution_id.into(),
            index,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", PREFIX, self.resolution_id, self.index)
    }

    pub fn parse(data: &str) -> Option<Self> {
        if data.len() > MAX_CALLBACK_DATA_BYTES {
            return None;
        }
        let mut parts = data.splitn(3, ':');
        if parts.next()? != PREFIX {
            return None;
        }
        let resolution_id = parts.next().filter(|id| !id.is_empty())?;
        let index = parts.next()?.parse().ok()?;
        Some(Self::new(resolution_id, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse() {
        let selection = DownloadSelection::new("a1b2c3d4e5", 3);
        assert_eq!(selection.encode(), "dl:a1b2c3d4e5:3");
        assert_eq!(DownloadSelection::parse("dl:a1b2c3d4e5:3"), Some(selection));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for data in ["", "dl", "dl::1", "dl:abc", "dl:abc:x", "video_0", "xx:abc:1", "dl:abc:-1"] {
            assert_eq!(DownloadSelection::parse(data), None, "{data}");
        }
        let long = format!("dl:{}:0", "a".repeat(70));
        assert_eq!(DownloadSelection::parse(&long), None);
    }
}
