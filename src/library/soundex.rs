/// Classic Soundex applied to every whitespace/comma separated token,
/// with the per-token codes joined by a single space.
///
/// Used to fuzzy-match free-form EPUB `dc:subject` values against the
/// FB2 genre taxonomy, where subjects arrive with inconsistent casing,
/// plurals and misspellings.
pub fn soundex_by_word(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .map(soundex)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Number of whitespace/comma separated tokens in a string.
pub fn words_count(s: &str) -> usize {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .count()
}

/// Reverse the word order of a string ("Science Fiction" -> "Fiction Science").
pub fn words_reversed(s: &str) -> String {
    let mut words: Vec<&str> = s.split_whitespace().collect();
    words.reverse();
    words.join(" ")
}

/// Classic 4-character Soundex code of a single word.
/// Non-ASCII-alphabetic characters are ignored; an empty input yields "".
pub fn soundex(word: &str) -> String {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut code = String::with_capacity(4);
    code.push(first);

    let mut last_digit = soundex_digit(first);
    for &c in &letters[1..] {
        let digit = soundex_digit(c);
        match digit {
            0 => {
                // H and W are transparent; vowels reset the run
                if c != 'H' && c != 'W' {
                    last_digit = 0;
                }
            }
            d if d != last_digit => {
                code.push((b'0' + d) as char);
                last_digit = d;
                if code.len() == 4 {
                    break;
                }
            }
            _ => {}
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    code
}

fn soundex_digit(c: char) -> u8 {
    match c {
        'B' | 'F' | 'P' | 'V' => 1,
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => 2,
        'D' | 'T' => 3,
        'L' => 4,
        'M' | 'N' => 5,
        'R' => 6,
        _ => 0,
    }
}
