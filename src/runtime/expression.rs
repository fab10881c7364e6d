/// Condition expressions and `${var}` interpolation
///
/// Conditions are parsed once into a small AST and evaluated against a
/// read-only variables snapshot. Grammar, loosest binding first:
///
/// ```text
/// or      := and ( "||" and )*
/// and     := unary ( "&&" unary )*
/// unary   := "!" unary | compare
/// compare := primary ( ( "==" | "!=" ) primary )?
/// primary := "(" or ")" | operand+
/// operand := ${path} | "quoted" | 'quoted' | true | false | null | word
/// ```
///
/// Comparison renders both sides to strings and compares the text, so
/// `${count} == 3` holds when `count` is the number 3 or the string "3".
/// Adjacent bare words form one operand joined by single spaces.

use crate::error::ExpressionError;
use crate::workflow::types::Variables;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Str(String),
    Word(String),
    True,
    False,
    Null,
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Var(name) => format!("${{{}}}", name),
            Token::Str(s) => format!("\"{}\"", s),
            Token::Word(w) => w.clone(),
            Token::True => "true".into(),
            Token::False => "false".into(),
            Token::Null => "null".into(),
            Token::Eq => "==".into(),
            Token::Ne => "!=".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Not => "!".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/' | '+' | '@' | '#' | '%' | '*' | '<' | '>')
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '=' if chars.get(pos + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                pos += 2;
            }
            '!' if chars.get(pos + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                pos += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                pos += 1;
            }
            '&' if chars.get(pos + 1) == Some(&'&') => {
                tokens.push(Token::And);
                pos += 2;
            }
            '|' if chars.get(pos + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                pos += 2;
            }
            '$' if chars.get(pos + 1) == Some(&'{') => {
                let start = pos;
                let close = chars[pos + 2..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or(ExpressionError::Unterminated("variable reference", start))?;
                let name: String = chars[pos + 2..pos + 2 + close].iter().collect();
                tokens.push(Token::Var(name.trim().to_string()));
                pos += close + 3;
            }
            '"' | '\'' => {
                let start = pos;
                let close = chars[pos + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or(ExpressionError::Unterminated("string", start))?;
                tokens.push(Token::Str(chars[pos + 1..pos + 1 + close].iter().collect()));
                pos += close + 2;
            }
            c if is_word_char(c) => {
                let start = pos;
                while pos < chars.len() && is_word_char(chars[pos]) {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Word(word),
                });
            }
            ch => return Err(ExpressionError::UnexpectedChar { ch, pos }),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Var(String),
    /// Quoted text; `${var}` inside it is interpolated at evaluation time
    Str(String),
    Word(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Operand(Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                let right = self.parse_primary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                let right = self.parse_primary()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken(other.describe())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(Token::Var(name)) => Ok(Expr::Operand(Operand::Var(name))),
            Some(Token::Str(text)) => Ok(Expr::Operand(Operand::Str(text))),
            Some(Token::True) => Ok(Expr::Operand(Operand::Literal(Value::Bool(true)))),
            Some(Token::False) => Ok(Expr::Operand(Operand::Literal(Value::Bool(false)))),
            Some(Token::Null) => Ok(Expr::Operand(Operand::Literal(Value::Null))),
            Some(Token::Word(first)) => {
                let mut words = vec![first];
                while let Some(Token::Word(next)) = self.peek() {
                    words.push(next.clone());
                    self.pos += 1;
                }
                Ok(Expr::Operand(Operand::Word(words.join(" "))))
            }
            Some(other) => Err(ExpressionError::UnexpectedToken(other.describe())),
        }
    }
}

/// A parsed condition, reusable across evaluations
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(src: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(ExpressionError::UnexpectedToken(extra.describe()));
        }
        Ok(Self {
            source: src.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        truthy(&eval(&self.expr, variables))
    }
}

/// Parse and evaluate in one go
pub fn evaluate_condition(src: &str, variables: &Variables) -> Result<bool, ExpressionError> {
    Ok(Condition::parse(src)?.evaluate(variables))
}

fn eval(expr: &Expr, variables: &Variables) -> Value {
    match expr {
        Expr::Operand(Operand::Var(name)) => lookup_path(variables, name)
            .cloned()
            .unwrap_or_else(|| Value::String(format!("${{{}}}", name))),
        Expr::Operand(Operand::Str(text)) => Value::String(interpolate(text, variables)),
        Expr::Operand(Operand::Word(word)) => Value::String(word.clone()),
        Expr::Operand(Operand::Literal(value)) => value.clone(),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, variables))),
        Expr::And(l, r) => Value::Bool(truthy(&eval(l, variables)) && truthy(&eval(r, variables))),
        Expr::Or(l, r) => Value::Bool(truthy(&eval(l, variables)) || truthy(&eval(r, variables))),
        Expr::Eq(l, r) => Value::Bool(render(&eval(l, variables)) == render(&eval(r, variables))),
        Expr::Ne(l, r) => Value::Bool(render(&eval(l, variables)) != render(&eval(r, variables))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// String form used by comparison and interpolation: strings raw, other JSON compact
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a dotted path (`user.address.city`) through nested objects
pub fn lookup_path<'a>(variables: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = variables.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace every `${name}` whose name is a known variable; others stay as written
pub fn interpolate(text: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(&render(value)),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Interpolate every string inside a JSON value, recursively
pub fn interpolate_value(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn equality_compares_rendered_text() {
        let v = vars(json!({ "status": "ok", "count": 3, "flag": true }));
        assert!(evaluate_condition("${status} == ok", &v).unwrap());
        assert!(evaluate_condition("${count} == 3", &v).unwrap());
        assert!(evaluate_condition("${count} == \"3\"", &v).unwrap());
        assert!(evaluate_condition("${status} != failed", &v).unwrap());
        assert!(evaluate_condition("${flag}", &v).unwrap());
    }

    #[test]
    fn boolean_operators_and_grouping() {
        let v = vars(json!({ "a": 1, "b": 2 }));
        assert!(evaluate_condition("${a} == 1 && ${b} == 2", &v).unwrap());
        assert!(evaluate_condition("${a} == 5 || ${b} == 2", &v).unwrap());
        assert!(!evaluate_condition("!(${a} == 1)", &v).unwrap());
        assert!(evaluate_condition("!(${a} == 1 && ${b} == 3)", &v).unwrap());
    }

    #[test]
    fn unknown_variables_render_as_written() {
        let v = Variables::new();
        assert!(!evaluate_condition("${missing} == ok", &v).unwrap());
        assert!(evaluate_condition("${missing} == '${missing}'", &v).unwrap());
    }

    #[test]
    fn multi_word_operands_and_dotted_paths() {
        let v = vars(json!({ "user": { "name": "Ada Lovelace" } }));
        assert!(evaluate_condition("${user.name} == Ada Lovelace", &v).unwrap());
    }

    #[test]
    fn parse_errors_are_reported() {
        assert_eq!(Condition::parse("   ").unwrap_err(), ExpressionError::Empty);
        assert!(matches!(
            Condition::parse("${a == 1").unwrap_err(),
            ExpressionError::Unterminated(_, 0)
        ));
        assert_eq!(Condition::parse("${a} ==").unwrap_err(), ExpressionError::UnexpectedEnd);
        assert!(matches!(
            Condition::parse("(${a} == 1").unwrap_err(),
            ExpressionError::UnexpectedEnd
        ));
        assert!(matches!(
            Condition::parse("a ; b").unwrap_err(),
            ExpressionError::UnexpectedChar { ch: ';', .. }
        ));
    }

    #[test]
    fn interpolation_replaces_known_names_only() {
        let v = vars(json!({ "name": "World", "n": 2, "obj": { "k": 1 } }));
        assert_eq!(interpolate("Hello ${name}!", &v), "Hello World!");
        assert_eq!(interpolate("${n} items", &v), "2 items");
        assert_eq!(interpolate("${obj}", &v), "{\"k\":1}");
        assert_eq!(interpolate("${unknown} and ${name", &v), "${unknown} and ${name");

        let config = json!({ "url": "http://x/${name}", "retries": 3, "tags": ["${n}"] });
        assert_eq!(
            interpolate_value(&config, &v),
            json!({ "url": "http://x/World", "retries": 3, "tags": ["2"] })
        );
    }
}
