//! Collation id to character set lookup.
//!
//! The table is built once on first use and never mutated. Servers with
//! collations missing here can be described through [`crate::Opts::custom_collations`].

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::constant::BINARY_COLLATION;

/// How column bytes of a character set are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Binary,
    Utf8,
    Latin1,
    Ascii,
    /// Decoded as UTF-8 when valid, otherwise left as bytes
    Other,
}

impl Charset {
    pub fn from_name(name: &str) -> Self {
        match name {
            "binary" => Charset::Binary,
            "utf8" | "utf8mb3" | "utf8mb4" => Charset::Utf8,
            "latin1" => Charset::Latin1,
            "ascii" => Charset::Ascii,
            _ => Charset::Other,
        }
    }
}

/// Per-connection overrides: collation id to charset name.
pub type CustomCollations = HashMap<u16, String>;

#[derive(Debug, Clone, Copy)]
pub struct Collation {
    pub id: u16,
    pub name: &'static str,
    pub charset: &'static str,
}

const KNOWN: &[(u16, &str, &str)] = &[
    (1, "big5_chinese_ci", "big5"),
    (2, "latin2_czech_cs", "latin2"),
    (3, "dec8_swedish_ci", "dec8"),
    (4, "cp850_general_ci", "cp850"),
    (5, "latin1_german1_ci", "latin1"),
    (7, "koi8r_general_ci", "koi8r"),
    (8, "latin1_swedish_ci", "latin1"),
    (9, "latin2_general_ci", "latin2"),
    (11, "ascii_general_ci", "ascii"),
    (12, "ujis_japanese_ci", "ujis"),
    (13, "sjis_japanese_ci", "sjis"),
    (15, "latin1_danish_ci", "latin1"),
    (19, "euckr_korean_ci", "euckr"),
    (24, "gb2312_chinese_ci", "gb2312"),
    (28, "gbk_chinese_ci", "gbk"),
    (31, "latin1_german2_ci", "latin1"),
    (33, "utf8mb3_general_ci", "utf8mb3"),
    (45, "utf8mb4_general_ci", "utf8mb4"),
    (46, "utf8mb4_bin", "utf8mb4"),
    (47, "latin1_bin", "latin1"),
    (48, "latin1_general_ci", "latin1"),
    (49, "latin1_general_cs", "latin1"),
    (63, "binary", "binary"),
    (65, "ascii_bin", "ascii"),
    (83, "utf8mb3_bin", "utf8mb3"),
    (94, "latin1_spanish_ci", "latin1"),
    (192, "utf8mb3_unicode_ci", "utf8mb3"),
    (224, "utf8mb4_unicode_ci", "utf8mb4"),
    (246, "utf8mb4_unicode_520_ci", "utf8mb4"),
    (248, "gb18030_chinese_ci", "gb18030"),
    (255, "utf8mb4_0900_ai_ci", "utf8mb4"),
    (278, "utf8mb4_0900_as_cs", "utf8mb4"),
    (305, "utf8mb4_0900_as_ci", "utf8mb4"),
    (309, "utf8mb4_0900_bin", "utf8mb4"),
];

static COLLATIONS: LazyLock<HashMap<u16, Collation>> = LazyLock::new(|| {
    KNOWN
        .iter()
        .map(|&(id, name, charset)| (id, Collation { id, name, charset }))
        .collect()
});

pub fn collation(id: u16) -> Option<&'static Collation> {
    COLLATIONS.get(&id)
}

/// Charset of a column, consulting the custom map before the built-in table.
pub fn charset_of(id: u16, custom: &CustomCollations) -> Charset {
    if id == BINARY_COLLATION {
        return Charset::Binary;
    }
    if let Some(name) = custom.get(&id) {
        return Charset::from_name(name);
    }
    collation(id).map_or(Charset::Other, |c| Charset::from_name(c.charset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let custom = CustomCollations::new();
        assert_eq!(charset_of(63, &custom), Charset::Binary);
        assert_eq!(charset_of(255, &custom), Charset::Utf8);
        assert_eq!(charset_of(8, &custom), Charset::Latin1);
        assert_eq!(charset_of(1000, &custom), Charset::Other);
        assert_eq!(collation(45).map(|c| c.name), Some("utf8mb4_general_ci"));
    }

    #[test]
    fn test_custom_override() {
        let mut custom = CustomCollations::new();
        custom.insert(1000, "latin1".to_string());
        custom.insert(63, "utf8mb4".to_string());
        assert_eq!(charset_of(1000, &custom), Charset::Latin1);
        // binary collation cannot be remapped
        assert_eq!(charset_of(63, &custom), Charset::Binary);
    }
}
