//! Calculator tool — a safe arithmetic expression evaluator.
//!
//! Recursive-descent parser over `+ - * / % ^`, parentheses, unary minus,
//! a small set of math functions, and the constants `pi` and `e`. No
//! variables, no assignment.

use serde_json::Value;

use parley_domain::error::Result;

use crate::protocol::{McpToolDef, ToolCallResult};

pub fn definition() -> McpToolDef {
    McpToolDef {
        name: "calculator".into(),
        description: "Evaluate an arithmetic expression, e.g. \"2 + 2 * 3\" or \"sqrt(2) * pi\""
            .into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate"
                }
            },
            "required": ["expression"]
        }),
        cacheable: true,
        cache_ttl_secs: None,
    }
}

pub fn call(args: &Value) -> Result<ToolCallResult> {
    let expression = args
        .get("expression")
        .and_then(|e| e.as_str())
        .unwrap_or("");

    match evaluate(expression) {
        Ok(result) => {
            let payload = serde_json::json!({
                "expression": expression,
                "result": result,
                "formatted_result": format_number(result),
            });
            Ok(ToolCallResult::ok(payload.to_string()))
        }
        Err(message) => Ok(ToolCallResult::error(format!(
            "calculation error: {message}"
        ))),
    }
}

/// Trim trailing zeros so `6.0` renders as `6` and `0.5000` as `0.5`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{n:.10}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Expression parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate an arithmetic expression. Grammar:
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := power (('*' | '/' | '%') power)*
/// power   := unary ('^' power)?            // right-associative
/// unary   := '-' unary | atom
/// atom    := number | const | func '(' expr (',' expr)* ')' | '(' expr ')'
/// ```
pub fn evaluate(input: &str) -> std::result::Result<f64, String> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Err("empty expression".into());
    }
    let value = parser.expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(format!(
            "unexpected input at position {}: '{}'",
            parser.pos,
            parser.rest()
        ));
    }
    if value.is_nan() {
        return Err("result is not a number".into());
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.bump();
                    value += self.term()?;
                }
                Some('-') => {
                    self.bump();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.bump();
                    value *= self.power()?;
                }
                Some('/') => {
                    self.bump();
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= rhs;
                }
                Some('%') => {
                    self.bump();
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        self.skip_ws();
        if self.peek() == Some('^') {
            self.bump();
            let exponent = self.power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        self.skip_ws();
        if self.peek() == Some('-') {
            self.bump();
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err("missing closing parenthesis".into());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.ident(),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> std::result::Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        // Scientific notation: 1e-3, 2.5E+7.
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| format!("bad number '{text}'"))
    }

    fn ident(&mut self) -> std::result::Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        if !self.eat('(') {
            return Err(format!("unknown constant '{name}'"));
        }
        let mut args = vec![self.expr()?];
        while self.eat(',') {
            args.push(self.expr()?);
        }
        if !self.eat(')') {
            return Err(format!("missing closing parenthesis after {name}(...)"));
        }

        apply_function(&name, &args)
    }
}

fn apply_function(name: &str, args: &[f64]) -> std::result::Result<f64, String> {
    let one = |args: &[f64]| -> std::result::Result<f64, String> {
        if args.len() == 1 {
            Ok(args[0])
        } else {
            Err(format!("{name} expects one argument"))
        }
    };

    match name {
        "abs" => Ok(one(args)?.abs()),
        "sqrt" => {
            let x = one(args)?;
            if x < 0.0 {
                return Err("sqrt of a negative number".into());
            }
            Ok(x.sqrt())
        }
        "sin" => Ok(one(args)?.sin()),
        "cos" => Ok(one(args)?.cos()),
        "tan" => Ok(one(args)?.tan()),
        "asin" => Ok(one(args)?.asin()),
        "acos" => Ok(one(args)?.acos()),
        "atan" => Ok(one(args)?.atan()),
        "log" => {
            let x = one(args)?;
            if x <= 0.0 {
                return Err("log of a non-positive number".into());
            }
            Ok(x.ln())
        }
        "log10" => {
            let x = one(args)?;
            if x <= 0.0 {
                return Err("log10 of a non-positive number".into());
            }
            Ok(x.log10())
        }
        "exp" => Ok(one(args)?.exp()),
        "round" => Ok(one(args)?.round()),
        "floor" => Ok(one(args)?.floor()),
        "ceil" => Ok(one(args)?.ceil()),
        "pow" => match args {
            [base, exp] => Ok(base.powf(*exp)),
            _ => Err("pow expects two arguments".into()),
        },
        "min" => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| "min expects at least one argument".into()),
        "max" => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| "max expects at least one argument".into()),
        other => Err(format!("unknown function '{other}'")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
