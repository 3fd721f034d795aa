//! Removal of upload references from document bodies.

use regex::Regex;

/// Replaces every markdown reference to `upload://{short_link}` (image or link form)
/// with `placeholder`. Returns `None` when the body holds no such reference.
pub fn redact_upload_references(
    raw: &str,
    short_link: &str,
    placeholder: &str,
) -> Result<Option<String>, regex::Error> {
    let pattern = format!(
        r"!?\[(.*?)\]\(upload://{}\)",
        regex::escape(short_link)
    );
    let re = Regex::new(&pattern)?;

    if !re.is_match(raw) {
        return Ok(None);
    }

    Ok(Some(
        re.replace_all(raw, regex::NoExpand(placeholder))
            .into_owned(),
    ))
}
