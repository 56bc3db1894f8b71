use regex::bytes::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(CSS_IMPORT_REGEX, r#"(?i)(?P<prefix>@import\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#);
regex!(STYLE_BLOCK_REGEX, r"(?is)(?P<open><style\b[^>]*>)(?P<body>.*?)(?P<close></style\s*>)");
regex!(STYLE_ATTR_REGEX, r#"(?i)(?P<prefix>\sstyle\s*=\s*)(?P<value>"[^"]*"|'[^']*')"#);
regex!(INPUT_TAG_REGEX, r"(?i)<input\b[^>]*>");
regex!(LINK_TAG_REGEX, r"(?i)<link\b[^>]*>");
regex!(
    ATTRIBUTE_REGEX,
    r#"(?i)(?P<name>[a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^\s"'>]+))"#
);
// `\b` keeps `<header>` and `<bodyguard>` out of the count.
regex!(STRUCTURE_TAG_REGEX, r"(?i)<(?P<close>/?)(?P<name>html|head|body)\b[^>]*>");
