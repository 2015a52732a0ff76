//! Safe arithmetic evaluation — a small recursive-descent parser instead of
//! anything eval-shaped. Supports + - * / % ^ (also **), parentheses,
//! one-argument functions and the constants pi / e.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "calculate",
        "Wertet einen mathematischen Ausdruck sicher aus. Unterstuetzt +, -, *, /, **, sqrt, sin, cos, tan, log, pi, e.",
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematischer Ausdruck, z.B. '2 + 3 * 4', 'sqrt(144)', 'sin(pi/2)'"
                }
            },
            "required": ["expression"]
        }),
        Arc::new(CalculatorHandler),
        ToolOrigin::Builtin,
    )
}

struct CalculatorHandler;

#[async_trait]
impl ToolHandler for CalculatorHandler {
    async fn call(&self, args: Value, _ctx: &HandlerContext) -> Result<Value> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        match evaluate(&expression) {
            Ok(result) => match serde_json::Number::from_f64(result) {
                Some(n) => Ok(json!({ "expression": expression, "result": n })),
                None => Ok(json!({
                    "error": "Ungueltiger Ausdruck",
                    "expression": expression
                })),
            },
            Err(e) => Ok(json!({ "error": e, "expression": expression })),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                // ** is exponentiation, same as ^
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Caret);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text.parse().map_err(|_| "Ungueltiger Ausdruck".to_string())?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("Operator nicht erlaubt: {other}")),
        }
    }
    Ok(tokens)
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> std::result::Result<(), String> {
        if self.next().as_ref() == Some(&token) {
            Ok(())
        } else {
            Err("Ungueltiger Ausdruck".to_string())
        }
    }

    // expr := term (('+'|'-') term)*
    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    // term := unary (('*'|'/'|'%') unary)*
    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    value /= self.unary()?;
                }
                Some(Token::Percent) => {
                    self.next();
                    value %= self.unary()?;
                }
                _ => return Ok(value),
            }
        }
    }

    // unary := '-' unary | '+' unary | power
    fn unary(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?   (right-associative)
    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Caret) {
            self.next();
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let arg = self.expr()?;
                    self.expect(Token::RParen)?;
                    apply_function(&name, arg)
                } else {
                    constant(&name)
                }
            }
            _ => Err("Ungueltiger Ausdruck".to_string()),
        }
    }
}

fn apply_function(name: &str, arg: f64) -> std::result::Result<f64, String> {
    match name {
        "sqrt" => Ok(arg.sqrt()),
        "sin" => Ok(arg.sin()),
        "cos" => Ok(arg.cos()),
        "tan" => Ok(arg.tan()),
        "log" => Ok(arg.ln()),
        "log10" => Ok(arg.log10()),
        "abs" => Ok(arg.abs()),
        "round" => Ok(arg.round()),
        other => Err(format!("Funktion nicht erlaubt: {other}")),
    }
}

fn constant(name: &str) -> std::result::Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => Err(format!("Variable nicht erlaubt: {other}")),
    }
}

pub fn evaluate(expression: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("Ungueltiger Ausdruck".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("Ungueltiger Ausdruck".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_parens() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("10 % 3").unwrap(), 1.0);
        assert_eq!(evaluate("2 ^ 10").unwrap(), 1024.0);
        assert_eq!(evaluate("2 ** 3").unwrap(), 8.0);
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(evaluate("sqrt(144)").unwrap(), 12.0);
        assert!((evaluate("sin(pi/2)").unwrap() - 1.0).abs() < 1e-12);
        assert!((evaluate("log(e)").unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(evaluate("abs(-5)").unwrap(), 5.0);
    }

    #[test]
    fn unary_minus() {
        assert_eq!(evaluate("-3 + 5").unwrap(), 2.0);
        assert_eq!(evaluate("2 * -3").unwrap(), -6.0);
        assert_eq!(evaluate("-(2 + 3)").unwrap(), -5.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(evaluate("").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("foo(2)").is_err());
        assert!(evaluate("x + 1").is_err());
        assert!(evaluate("2 & 3").is_err());
        assert!(evaluate("(2 + 3").is_err());
        assert!(evaluate("2 3").is_err());
    }

    #[test]
    fn unknown_function_names_the_offender() {
        let result = evaluate("nope(1)");
        assert_eq!(result.unwrap_err(), "Funktion nicht erlaubt: nope");
    }
}
