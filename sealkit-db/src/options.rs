//! Open options for a [`Database`](crate::Database).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cipher::CipherOptions;

/// How a database is opened and which built-in PRAGMAs run on every open.
///
/// Every field defaults, so a partial JSON document such as
/// `{"journal_wal": true}` is a valid set of options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Open without write access. The file must already exist.
    pub read_only: bool,
    /// Busy timeout applied to the raw connection before the cipher key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
    /// `PRAGMA journal_mode = WAL`.
    pub journal_wal: bool,
    /// `PRAGMA foreign_keys = ON`.
    pub foreign_keys: bool,
    /// `PRAGMA secure_delete = ON`.
    pub secure_delete: bool,
    /// Cipher format used with keys set through
    /// [`Database::set_cipher`](crate::Database::set_cipher).
    pub cipher: CipherOptions,
}

impl OpenOptions {
    /// The busy timeout as a [`Duration`], if one is set.
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }

    /// Returns `true` when any built-in PRAGMA is requested.
    pub const fn needs_basic_config(&self) -> bool {
        self.journal_wal || self.foreign_keys || self.secure_delete
    }

    /// The PRAGMA script for the requested flags, empty when none are set.
    pub fn pragma_script(&self) -> String {
        let mut script = String::new();
        if self.foreign_keys {
            script.push_str("PRAGMA foreign_keys = ON;\n");
        }
        if self.secure_delete {
            script.push_str("PRAGMA secure_delete = ON;\n");
        }
        if self.journal_wal {
            script.push_str("PRAGMA journal_mode = WAL;\n");
        }
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: OpenOptions =
            serde_json::from_str(r#"{"journal_wal": true}"#).expect("parse options");
        assert!(options.journal_wal);
        assert!(!options.read_only);
        assert_eq!(options.busy_timeout(), None);
        assert!(options.needs_basic_config());
        assert_eq!(options.cipher, CipherOptions::default());
    }

    #[test]
    fn test_cipher_section_parses() {
        let options: OpenOptions =
            serde_json::from_str(r#"{"cipher": {"version": 4, "page_size": 4096}}"#)
                .expect("parse options");
        assert_eq!(options.cipher, CipherOptions::sqlcipher(4).with_page_size(4096));
        assert!(!options.needs_basic_config());
    }

    #[test]
    fn test_pragma_script() {
        let options = OpenOptions {
            foreign_keys: true,
            secure_delete: true,
            ..OpenOptions::default()
        };
        assert_eq!(
            options.pragma_script(),
            "PRAGMA foreign_keys = ON;\nPRAGMA secure_delete = ON;\n"
        );
        assert!(OpenOptions::default().pragma_script().is_empty());
    }

    #[test]
    fn test_busy_timeout_round_trips_through_json() {
        let options = OpenOptions {
            busy_timeout_ms: Some(250),
            ..OpenOptions::default()
        };
        let json = serde_json::to_string(&options).expect("serialize");
        let back: OpenOptions = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, options);
        assert_eq!(back.busy_timeout(), Some(Duration::from_millis(250)));
    }
}
