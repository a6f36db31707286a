//! Palindrome classification of a single record.

/// Which outcome log a record belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Palindrome,
    NotPalindrome,
}

impl Classification {
    pub fn is_palindrome(self) -> bool {
        matches!(self, Self::Palindrome)
    }
}

/// Classify `text` by comparing mirrored characters.
///
/// Letters match regardless of case; every other character (spaces,
/// punctuation, digits) must match exactly. The middle character of an
/// odd-length text is not compared. Empty text is not a palindrome.
pub fn classify(text: &str) -> Classification {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Classification::NotPalindrome;
    }

    let mirrored = chars
        .iter()
        .zip(chars.iter().rev())
        .take(chars.len() / 2)
        .all(|(&a, &b)| chars_match(a, b));

    if mirrored {
        Classification::Palindrome
    } else {
        Classification::NotPalindrome
    }
}

fn chars_match(a: char, b: char) -> bool {
    if a.is_alphabetic() {
        a.to_lowercase().eq(b.to_lowercase())
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_palindromes() {
        assert_eq!(classify("racecar"), Classification::Palindrome);
        assert_eq!(classify("abba"), Classification::Palindrome);
        assert_eq!(classify("x"), Classification::Palindrome);
    }

    #[test]
    fn test_non_palindromes() {
        assert_eq!(classify("hello"), Classification::NotPalindrome);
        assert_eq!(classify("ab"), Classification::NotPalindrome);
    }

    #[test]
    fn test_empty_is_not_palindrome() {
        assert_eq!(classify(""), Classification::NotPalindrome);
    }

    #[test]
    fn test_letters_ignore_case() {
        assert_eq!(classify("RaceCar"), Classification::Palindrome);
        assert_eq!(classify("Abba"), Classification::Palindrome);
    }

    #[test]
    fn test_non_letters_must_match_exactly() {
        assert_eq!(classify("a b a"), Classification::Palindrome);
        assert_eq!(classify("a!b?a"), Classification::NotPalindrome);
        assert_eq!(classify("12321"), Classification::Palindrome);
        assert_eq!(classify("1221 "), Classification::NotPalindrome);
    }

    #[test]
    fn test_spaces_are_not_skipped() {
        // Mirrored positions pair 'A' with 'n', so this fails even though
        // letters alone almost line up.
        assert_eq!(classify("A man a Plan"), Classification::NotPalindrome);
        assert_eq!(classify("Step on no pets"), Classification::Palindrome);
    }

    #[test]
    fn test_letter_never_matches_symbol() {
        // 'A' and '!' differ by exactly the ASCII case offset.
        assert_eq!(classify("A!"), Classification::NotPalindrome);
    }

    #[test]
    fn test_middle_character_ignored() {
        assert_eq!(classify("ab?ba"), Classification::Palindrome);
    }

    #[test]
    fn test_unicode_letters() {
        assert_eq!(classify("Ésa"), Classification::NotPalindrome);
        assert_eq!(classify("éSÉ"), Classification::Palindrome);
    }
}
