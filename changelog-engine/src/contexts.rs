//! Execution contexts.
//!
//! The runtime passes a set of context labels ([Contexts]). Every change set may
//! carry a [ContextExpression] deciding whether it runs under those labels:
//!
//! - no runtime contexts: every change set runs
//! - no expression on the change set: it always runs
//! - otherwise the expression is evaluated, a label being true if it is part of the runtime set
//!
//! Expressions support `,` and `or`, `and`, `!` and `not`, and parentheses.
//! `and` binds tighter than `or`.

use std::{collections::BTreeSet, fmt::Display, str::FromStr};

/// The set of context labels an update runs with. Labels are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contexts(BTreeSet<String>);

impl Contexts {
    /// Parse a comma separated list of labels. Blank entries are ignored.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(|label| label.trim().to_lowercase())
                .filter(|label| !label.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(&label.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromStr for Contexts {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Display for Contexts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Label(String),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, contexts: &Contexts) -> bool {
        match self {
            Node::Label(label) => contexts.contains(label),
            Node::Not(node) => !node.eval(contexts),
            Node::And(left, right) => left.eval(contexts) && right.eval(contexts),
            Node::Or(left, right) => left.eval(contexts) || right.eval(contexts),
        }
    }
}

/// The context condition of a single change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextExpression {
    raw: String,
    root: Option<Node>,
}

impl ContextExpression {
    /// Parse an expression. A blank expression matches everything.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let tokens = tokenize(raw)?;
        if tokens.is_empty() {
            return Ok(Self::default());
        }
        let mut parser = Parser { tokens, position: 0 };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(format!("unexpected [{}]", token));
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            root: Some(root),
        })
    }

    /// Whether a change set with this expression runs under `contexts`.
    pub fn matches(&self, contexts: &Contexts) -> bool {
        if contexts.is_empty() {
            return true;
        }
        match &self.root {
            None => true,
            Some(root) => root.eval(contexts),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Display for ContextExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Label(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Label(label) => write!(f, "{}", label),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "!"),
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
        }
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let token = match word.to_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            label => Token::Label(label.to_string()),
        };
        tokens.push(token);
        word.clear();
    };
    for c in raw.chars() {
        match c {
            ',' | '(' | ')' | '!' => {
                flush(&mut word, &mut tokens);
                tokens.push(match c {
                    ',' => Token::Or,
                    '(' => Token::Open,
                    ')' => Token::Close,
                    _ => Token::Not,
                });
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') => word.push(c),
            c => return Err(format!("invalid character [{}]", c)),
        }
    }
    flush(&mut word, &mut tokens);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Node, String> {
        let mut node = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let right = self.parse_and()?;
            node = Node::Or(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node, String> {
        let mut node = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let right = self.parse_not()?;
            node = Node::And(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Node, String> {
        if self.peek() == Some(&Token::Not) {
            self.position += 1;
            return Ok(Node::Not(Box::new(self.parse_not()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Label(label)) => Ok(Node::Label(label)),
            Some(Token::Open) => {
                let node = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(node),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected [{}]", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(expression: &str, contexts: &str) -> bool {
        ContextExpression::parse(expression)
            .unwrap()
            .matches(&Contexts::parse(contexts))
    }

    #[test]
    fn test_contexts_parse() {
        let contexts = Contexts::parse(" Test, ,prod ");
        assert!(contexts.contains("test"));
        assert!(contexts.contains("PROD"));
        assert_eq!(contexts.to_string(), "prod,test");
        assert!(Contexts::parse("").is_empty());
        assert!(Contexts::parse(" , ").is_empty());
    }

    #[test]
    fn test_empty_runtime_contexts_run_everything() {
        assert!(matches("test", ""));
        assert!(matches("!test", ""));
    }

    #[test]
    fn test_empty_expression_always_runs() {
        assert!(matches("", "test"));
        assert!(ContextExpression::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn test_labels_and_lists() {
        assert!(matches("test", "test"));
        assert!(!matches("test", "prod"));
        assert!(matches("dev, test", "test"));
        assert!(matches("dev or test", "test"));
        assert!(!matches("dev and test", "test"));
        assert!(matches("dev and test", "test,dev"));
    }

    #[test]
    fn test_negation_and_precedence() {
        assert!(matches("!test", "prod"));
        assert!(!matches("not test", "test"));
        // and binds tighter than or
        assert!(matches("prod or dev and test", "prod"));
        assert!(!matches("(prod or dev) and test", "prod"));
        assert!(matches("!(dev or test)", "prod"));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(ContextExpression::parse("test and").is_err());
        assert!(ContextExpression::parse("(test").is_err());
        assert!(ContextExpression::parse("test)").is_err());
        assert!(ContextExpression::parse("te$t").is_err());
    }
}
