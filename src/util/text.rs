use std::borrow::Cow;

/// Marker appended to text cut by [`truncate`]
pub const ELLIPSIS: &str = "...";

/// Truncates `text` to at most `max_len` characters, appending [`ELLIPSIS`] when cut.
///
/// Lengths are counted in Unicode scalar values, not bytes, so multibyte
/// text is never split mid-character. The ellipsis is not counted against
/// `max_len`: a string of exactly `max_len` characters is returned unchanged,
/// one character longer is cut to `max_len` plus the marker.
///
/// # Examples
///
/// ```
/// use newsportal::util::truncate;
///
/// assert_eq!(truncate("abcde", 3), "abc...");
/// assert_eq!(truncate("ab", 3), "ab");
/// assert_eq!(truncate("Привет", 3), "При...");
/// ```
pub fn truncate(text: &str, max_len: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_len) {
        // Fewer than max_len + 1 chars: fits as-is
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}{}", &text[..cut], ELLIPSIS)),
    }
}

/// Strip control characters and terminal escape sequences from user-supplied text.
///
/// Post titles, category names and author names end up both in email subjects
/// and in CLI output, so embedded ESC sequences and C0 controls are removed.
/// Tab, newline and carriage return survive.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    fn is_stripped(c: char) -> bool {
        c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'))
    }

    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            if !is_stripped(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            // CSI: parameters until a final byte in 0x40..=0x7e
            Some('[') => {
                chars.next();
                for n in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&n) {
                        break;
                    }
                }
            }
            // OSC: until BEL or ST (ESC \)
            Some(']') => {
                chars.next();
                while let Some(n) = chars.next() {
                    if n == '\u{07}' {
                        break;
                    }
                    if n == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}
