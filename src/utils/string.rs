//! UTF-8 safe string helpers.
//!
//! Every length here counts Unicode scalar values (chars), never bytes, so
//! slicing can not panic on multibyte text.

/// Return the first `n` characters of `s` as a `String` (no ellipsis).
pub fn prefix_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Return a preview of `s` up to `n` characters. If `s` is longer than `n`
/// characters, the returned string will include a trailing ellipsis `...`.
pub fn preview(s: &str, n: usize) -> String {
    let mut prefix = prefix_chars(s, n);
    if s.chars().count() > n {
        prefix.push_str("...");
    }
    prefix
}

/// Return the last `n` characters of `s`.
pub fn suffix_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if total <= n {
        return s;
    }
    match s.char_indices().nth(total - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Split `s` into consecutive pieces of at most `size` characters.
///
/// An empty string yields no pieces. `size` of zero is treated as one.
pub fn chunk_chars(s: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in s.chars() {
        current.push(c);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_basic_ascii() {
        let s = "hello world";
        assert_eq!(preview(s, 5), "hello...");
        assert_eq!(preview(s, 20), "hello world");
    }

    #[test]
    fn suffix_multibyte() {
        assert_eq!(suffix_chars("héllo wörld", 5), "wörld");
        assert_eq!(suffix_chars("abc", 10), "abc");
        assert_eq!(suffix_chars("abc", 0), "");
    }

    #[test]
    fn chunk_exact_and_remainder() {
        assert_eq!(chunk_chars("abcdef", 3), vec!["abc", "def"]);
        assert_eq!(chunk_chars("abcdefg", 3), vec!["abc", "def", "g"]);
        assert!(chunk_chars("", 3).is_empty());
    }

    #[test]
    fn chunk_counts_chars_not_bytes() {
        let s = "日本語テキスト";
        let chunks = chunk_chars(s, 2);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), s);
    }
}
