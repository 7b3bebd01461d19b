//! Pipeline stage construction.

use std::fmt;
use std::path::PathBuf;

use super::split::{split, split_words, Operator};
use crate::error::CourierError;
use crate::Result;

/// One subprocess of a `|`-chained command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Files read after the upstream input, from `<`.
    pub input_files: Vec<PathBuf>,
    /// Files receiving this stage's output, from `>`.
    pub output_files: Vec<PathBuf>,
}

impl PipelineStage {
    /// Create a stage from an argument vector.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            input_files: Vec::new(),
            output_files: Vec::new(),
        }
    }

    /// Parse the text between two `|` operators.
    pub fn parse(segment: &str) -> Result<Self> {
        let mut tokens = split(segment, &['<', '>']).into_iter();

        let invocation = tokens.next().ok_or(CourierError::EmptyCommand)?;
        if invocation.operator != Operator::None {
            return Err(CourierError::EmptyCommand);
        }
        let argv = split_words(&invocation.text);
        if argv.is_empty() {
            return Err(CourierError::EmptyCommand);
        }

        let mut stage = Self::new(argv);
        for token in tokens {
            let path = redirect_target(&token.text, token.operator)?;
            match token.operator {
                Operator::InputRedirect => stage.input_files.push(path),
                Operator::OutputRedirect => stage.output_files.push(path),
                Operator::None | Operator::Pipe => {
                    return Err(CourierError::Syntax(format!(
                        "unexpected token `{}`",
                        token.text
                    )))
                }
            }
        }

        Ok(stage)
    }

    /// The program name (`argv[0]`).
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// Run the stage through `sudo -S`, reading the password from stdin.
    pub fn elevate(&mut self) {
        let mut argv = vec!["sudo".to_string(), "-S".to_string()];
        argv.append(&mut self.argv);
        self.argv = argv;
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

fn redirect_target(text: &str, operator: Operator) -> Result<PathBuf> {
    let mut words = split_words(text);
    let symbol = operator.as_char().unwrap_or(' ');
    match words.len() {
        1 => Ok(PathBuf::from(words.remove(0))),
        0 => Err(CourierError::Syntax(format!(
            "missing file name after `{}`",
            symbol
        ))),
        _ => Err(CourierError::Syntax(format!(
            "expected one file name after `{}`, got `{}`",
            symbol, text
        ))),
    }
}

/// Split a command line into its pipeline stages.
pub fn parse_pipeline(command_line: &str) -> Result<Vec<PipelineStage>> {
    let tokens = split(command_line, &['|']);
    if tokens.is_empty() {
        return Err(CourierError::EmptyCommand);
    }
    tokens
        .iter()
        .map(|token| PipelineStage::parse(&token.text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_stage() {
        let stage = PipelineStage::parse("ls -la /tmp").unwrap();
        assert_eq!(stage.program(), "ls");
        assert_eq!(stage.args(), &["-la".to_string(), "/tmp".to_string()]);
        assert!(stage.input_files.is_empty());
        assert!(stage.output_files.is_empty());
    }

    #[test]
    fn test_parse_redirects() {
        let stage = PipelineStage::parse("sort -r < in.txt > 'out file.txt'").unwrap();
        assert_eq!(stage.argv, vec!["sort", "-r"]);
        assert_eq!(stage.input_files, vec![PathBuf::from("in.txt")]);
        assert_eq!(stage.output_files, vec![PathBuf::from("out file.txt")]);
    }

    #[test]
    fn test_parse_quoted_redirect_char() {
        let stage = PipelineStage::parse(r#"echo "a > b""#).unwrap();
        assert_eq!(stage.argv, vec!["echo", "a > b"]);
        assert!(stage.output_files.is_empty());
    }

    #[test]
    fn test_missing_redirect_target() {
        let err = PipelineStage::parse("echo hi >").unwrap_err();
        assert!(matches!(err, CourierError::Syntax(_)));

        let err = PipelineStage::parse("echo hi > a b").unwrap_err();
        assert!(matches!(err, CourierError::Syntax(_)));
    }

    #[test]
    fn test_leading_redirect_is_empty_command() {
        let err = PipelineStage::parse("< in.txt").unwrap_err();
        assert!(matches!(err, CourierError::EmptyCommand));
    }

    #[test]
    fn test_parse_pipeline() {
        let stages = parse_pipeline("cat < in | grep -v x | wc -l > count").unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].input_files, vec![PathBuf::from("in")]);
        assert_eq!(stages[1].argv, vec!["grep", "-v", "x"]);
        assert_eq!(stages[2].output_files, vec![PathBuf::from("count")]);
    }

    #[test]
    fn test_parse_pipeline_empty() {
        assert!(matches!(
            parse_pipeline("").unwrap_err(),
            CourierError::EmptyCommand
        ));
        assert!(matches!(
            parse_pipeline("echo a | | cat").unwrap_err(),
            CourierError::EmptyCommand
        ));
        assert!(matches!(
            parse_pipeline("echo a |").unwrap_err(),
            CourierError::EmptyCommand
        ));
    }

    #[test]
    fn test_elevate() {
        let mut stage = PipelineStage::new(["ls", "/root"]);
        stage.elevate();
        assert_eq!(stage.argv, vec!["sudo", "-S", "ls", "/root"]);
        assert_eq!(stage.to_string(), "sudo -S ls /root");
    }
}
