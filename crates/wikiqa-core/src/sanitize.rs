//! Wiki markup sanitizer.
//!
//! Strips the parts of MediaWiki source that carry no answerable text
//! (galleries, file links, magic words, comments, layout tags) before the
//! content is tokenized. All patterns are non-greedy and match across
//! line boundaries.

use std::sync::LazyLock;

use regex::Regex;

static GALLERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(\|image.?=.?)?<gallery.*?>.*?</gallery>\\?\n?").expect("gallery pattern")
});
static FILE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\[File:.*?\]\]\\?").expect("file link pattern"));
static MAGIC_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)__.*?__").expect("magic word pattern"));
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->\\?\n?").expect("comment pattern"));
static SPAN_BR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<span.*?>|</span>\\?\n?|<br.*?>\\?\n?").expect("span/br pattern")
});
static DIV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<div.*?>|</div>\\?\n?").expect("div pattern"));
static BOLD_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'{3,}(.*?)'{3,}").expect("bold pattern"));
static PIPED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|]+?)\|([^\[\]]+?)\]\]").expect("piped link pattern")
});
static PLAIN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]").expect("plain link pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Optional sanitizer passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Reduce `'''bold'''` to its text, `[[target|label]]` to `label`
    /// and `[[target]]` to `target`.
    pub flatten_wikilinks: bool,
}

/// Clean raw page markup. Returns an empty string when nothing is left.
pub fn sanitize_content(raw: &str, options: &SanitizeOptions) -> String {
    let text = raw.replace("\\n", " ").replace(['\r', '\n'], " ");

    let text = GALLERY.replace_all(&text, "");
    let text = FILE_LINK.replace_all(&text, "");
    let text = MAGIC_WORD.replace_all(&text, "");
    let text = HTML_COMMENT.replace_all(&text, "");
    let text = SPAN_BR.replace_all(&text, "");
    let mut text = DIV.replace_all(&text, "").into_owned();

    if options.flatten_wikilinks {
        text = BOLD_ITALIC.replace_all(&text, "$1").into_owned();
        text = PIPED_LINK.replace_all(&text, "$2").into_owned();
        text = PLAIN_LINK.replace_all(&text, "$1").into_owned();
    }

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Lowercase, `_` → space, trimmed.
pub fn normalize_title(title: &str) -> String {
    title.to_lowercase().replace('_', " ").trim().to_string()
}

/// The final passage text for a page: `"{normalized title}. {content}"`.
pub fn prefixed_content(title: &str, sanitized: &str) -> String {
    format!("{}. {}", normalize_title(title), sanitized.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(raw: &str) -> String {
        sanitize_content(raw, &SanitizeOptions::default())
    }

    #[test]
    fn test_strips_newlines_and_collapses_whitespace() {
        assert_eq!(clean("line one\nline two\\nline   three"), "line one line two line three");
    }

    #[test]
    fn test_strips_gallery_across_lines() {
        let raw = "before |image = <gallery>\nA.png|a\nB.png|b\n</gallery> after";
        assert_eq!(clean(raw), "before after");
    }

    #[test]
    fn test_strips_file_links_non_greedy() {
        let raw = "[[File:Theia.png|thumb]] the theia [[File:Other.png]] is fast";
        assert_eq!(clean(raw), "the theia is fast");
    }

    #[test]
    fn test_strips_magic_words_and_comments() {
        let raw = "__NOTOC__ intro <!-- hidden\nnote --> body __NOEDITSECTION__";
        assert_eq!(clean(raw), "intro body");
    }

    #[test]
    fn test_strips_span_br_div() {
        let raw = "<div class=\"x\"><span style=\"color:red\">red</span><br/>text</div>";
        assert_eq!(clean(raw), "redtext");
    }

    #[test]
    fn test_empty_after_sanitize() {
        assert_eq!(clean("<!-- only a comment -->\n__NOTOC__"), "");
    }

    #[test]
    fn test_links_kept_unless_flattened() {
        let raw = "the '''[[Theia]]''' beats the [[Deity|deity class]]";
        assert_eq!(clean(raw), raw);
        let flat = sanitize_content(
            raw,
            &SanitizeOptions {
                flatten_wikilinks: true,
            },
        );
        assert_eq!(flat, "the Theia beats the deity class");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title(" Light_Cruiser_Theia "), "light cruiser theia");
    }

    #[test]
    fn test_prefixed_content() {
        assert_eq!(
            prefixed_content("Theia", "A light cruiser."),
            "theia. A light cruiser."
        );
    }
}
