//! Quote-aware command line splitting.

/// Control character preceding a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// First token of the input.
    None,
    /// `|`
    Pipe,
    /// `<`
    InputRedirect,
    /// `>`
    OutputRedirect,
}

impl Operator {
    /// Map a control character to its operator.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '|' => Some(Self::Pipe),
            '<' => Some(Self::InputRedirect),
            '>' => Some(Self::OutputRedirect),
            _ => None,
        }
    }

    /// The control character, or `None` for the leading token.
    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::None => None,
            Self::Pipe => Some('|'),
            Self::InputRedirect => Some('<'),
            Self::OutputRedirect => Some('>'),
        }
    }
}

/// A piece of a command line and the operator in front of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineToken {
    /// Operator preceding this token.
    pub operator: Operator,
    /// Trimmed token text, quotes preserved.
    pub text: String,
}

impl PipelineToken {
    fn new(operator: Operator, text: &str) -> Self {
        Self {
            operator,
            text: text.trim().to_string(),
        }
    }
}

/// Split `input` on the given control characters.
///
/// Control characters inside single or double quotes are literal. A quote
/// only toggles its own state when the other kind is not open, so `"it's"`
/// stays one quoted run. Each token is tagged with the delimiter seen
/// before it; the first token carries [`Operator::None`].
///
/// An operator with nothing after it yields an empty trailing token so
/// callers can reject it. An empty input yields no tokens.
pub fn split(input: &str, control: &[char]) -> Vec<PipelineToken> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut previous = Operator::None;

    for c in input.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                buf.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                buf.push(c);
            }
            c if !in_single && !in_double && control.contains(&c) => {
                tokens.push(PipelineToken::new(previous, &buf));
                buf.clear();
                previous = Operator::from_char(c).unwrap_or(Operator::None);
            }
            c => buf.push(c),
        }
    }

    if !buf.trim().is_empty() || previous != Operator::None {
        tokens.push(PipelineToken::new(previous, &buf));
    }

    tokens
}

/// Split a stage into words the way a POSIX shell would, minus expansion.
///
/// Single quotes are fully literal; inside double quotes a backslash only
/// escapes `"` and `\`; outside quotes a backslash escapes any character.
/// An unterminated quote runs to the end of the input.
pub fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_single {
            if c == '\'' {
                in_single = false;
            } else {
                word.push(c);
            }
            continue;
        }

        if in_double {
            match c {
                '"' => in_double = false,
                '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                    if let Some(next) = chars.next() {
                        word.push(next);
                    }
                }
                _ => word.push(c),
            }
            continue;
        }

        match c {
            '\'' => {
                in_single = true;
                in_word = true;
            }
            '"' => {
                in_double = true;
                in_word = true;
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    word.push(next);
                }
                in_word = true;
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(word);
    }

    words
}

/// Quote `word` for safe inclusion in a POSIX shell command.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
