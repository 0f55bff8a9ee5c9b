//! Calculator tool: evaluates mathematical expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, `**`, parentheses, unary signs, the
//! functions `abs round min max sum sqrt` and the constants `pi` and `e`.
//! Integer arithmetic stays integral until a float is involved; `/` always
//! produces a float. Uses a recursive-descent parser.

use async_trait::async_trait;
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform mathematical calculations. Supports + - * / % **, parentheses, \
         abs(), round(), min(), max(), sum(), sqrt(), pi and e."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematical expression to evaluate (e.g., '2 + 2', '10 * 5', 'abs(-5)')"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let expr = arguments["expression"].as_str().unwrap_or_default();
        if expr.trim().is_empty() {
            return Err(ToolError::InvalidArguments("Expression is required".into()));
        }

        let value = evaluate(expr).map_err(|e| ToolError::failed(self.name(), e))?;
        Ok(json!({
            "expression": expr,
            "result": value.to_json(),
            "result_type": value.type_name(),
        }))
    }
}

/// A calculation result that remembers whether it is integral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Number::Int(_) => "int",
            Number::Float(_) => "float",
        }
    }

    fn to_json(self) -> Value {
        match self {
            Number::Int(i) => json!(i),
            Number::Float(f) => json!(f),
        }
    }

    fn float(value: f64) -> Result<Number, String> {
        if value.is_finite() {
            Ok(Number::Float(value))
        } else {
            Err("Result is not a finite number".into())
        }
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate a mathematical expression string.
pub fn evaluate(expr: &str) -> Result<Number, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens);
    let result = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token at position {}: {:?}",
            parser.pos, parser.tokens[parser.pos]
        ));
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Comma,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' if chars.get(i + 1) == Some(&'*') => { tokens.push(Token::StarStar); i += 2; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '%' => { tokens.push(Token::Percent); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num = if num_str.contains('.') {
                    Number::Float(num_str.parse().map_err(|_| format!("Invalid number: {num_str}"))?)
                } else {
                    Number::Int(num_str.parse().map_err(|_| format!("Invalid number: {num_str}"))?)
                };
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => return Err(format!("Unexpected character: '{c}'")),
        }
    }

    Ok(tokens)
}

/// Deepest nesting of parentheses, calls and unary operators accepted.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Number, String> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.consume();
                    left = add(left, self.parse_term()?, false)?;
                }
                Some(Token::Minus) => {
                    self.consume();
                    left = add(left, self.parse_term()?, true)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<Number, String> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = match (left, right) {
                        (Number::Int(a), Number::Int(b)) => {
                            Number::Int(a.checked_mul(b).ok_or("Integer overflow")?)
                        }
                        (a, b) => Number::float(a.as_f64() * b.as_f64())?,
                    };
                }
                Some(Token::Slash) => {
                    self.consume();
                    let right = self.parse_unary()?;
                    if right.as_f64() == 0.0 {
                        return Err("Division by zero".into());
                    }
                    left = Number::float(left.as_f64() / right.as_f64())?;
                }
                Some(Token::Percent) => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = modulo(left, right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary = ('-' | '+') unary | power
    // Every recursive production passes through here, so the depth is bounded at this point.
    fn parse_unary(&mut self) -> Result<Number, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> Result<Number, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(match self.parse_unary()? {
                    Number::Int(i) => Number::Int(i.checked_neg().ok_or("Integer overflow")?),
                    Number::Float(f) => Number::Float(-f),
                })
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // power = primary ('**' unary)?   (right-associative, binds tighter than unary on the left)
    fn parse_power(&mut self) -> Result<Number, String> {
        let base = self.parse_primary()?;
        if let Some(Token::StarStar) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return power(base, exponent);
        }
        Ok(base)
    }

    // primary = NUMBER | IDENT | IDENT '(' args ')' | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Number, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let args = self.parse_args()?;
                    call(name, &args)
                } else {
                    constant(name)
                }
            }
            Some(tok) => Err(format!("Unexpected token: {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Number>, String> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.consume();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.consume() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err("Expected ',' or ')' in function call".into()),
            }
        }
    }
}

fn add(a: Number, b: Number, subtract: bool) -> Result<Number, String> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let r = if subtract { x.checked_sub(y) } else { x.checked_add(y) };
            Ok(Number::Int(r.ok_or("Integer overflow")?))
        }
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            Number::float(if subtract { x - y } else { x + y })
        }
    }
}

/// Floored modulo: the result takes the sign of the divisor.
fn modulo(a: Number, b: Number) -> Result<Number, String> {
    if b.as_f64() == 0.0 {
        return Err("Modulo by zero".into());
    }
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            // `checked_rem` only fails for i64::MIN % -1, whose remainder is 0.
            let r = x.checked_rem(y).unwrap_or(0);
            // r and y have opposite signs here, so the sum cannot overflow.
            Ok(Number::Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r }))
        }
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            Number::float(x - y * (x / y).floor())
        }
    }
}

fn power(base: Number, exponent: Number) -> Result<Number, String> {
    match (base, exponent) {
        (Number::Int(b), Number::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| "Exponent too large".to_string())?;
            Ok(Number::Int(b.checked_pow(e).ok_or("Integer overflow")?))
        }
        (b, e) => Number::float(b.as_f64().powf(e.as_f64())),
    }
}

fn constant(name: &str) -> Result<Number, String> {
    match name {
        "pi" => Ok(Number::Float(std::f64::consts::PI)),
        "e" => Ok(Number::Float(std::f64::consts::E)),
        _ => Err(format!("Unknown name: {name}")),
    }
}

fn call(name: &str, args: &[Number]) -> Result<Number, String> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{name}() takes {n} argument(s), got {}", args.len()))
        }
    };

    match name {
        "abs" => {
            arity(1)?;
            Ok(match args[0] {
                Number::Int(i) => Number::Int(i.checked_abs().ok_or("Integer overflow")?),
                Number::Float(f) => Number::Float(f.abs()),
            })
        }
        "round" => match args {
            [x] => {
                let rounded = x.as_f64().round_ties_even();
                if rounded.abs() < 9.0e15 {
                    Ok(Number::Int(rounded as i64))
                } else {
                    Number::float(rounded)
                }
            }
            [x, digits] => {
                let Number::Int(d) = digits else {
                    return Err("round() digits must be an integer".into());
                };
                let factor = 10f64.powi(i32::try_from(*d).map_err(|_| "round() digits out of range")?);
                Number::float((x.as_f64() * factor).round_ties_even() / factor)
            }
            _ => Err(format!("round() takes 1 or 2 arguments, got {}", args.len())),
        },
        "min" | "max" => {
            let first = *args.first().ok_or_else(|| format!("{name}() expects at least one argument"))?;
            Ok(args.iter().skip(1).fold(first, |best, &n| {
                let better = if name == "min" { n.as_f64() < best.as_f64() } else { n.as_f64() > best.as_f64() };
                if better { n } else { best }
            }))
        }
        "sum" => args.iter().try_fold(Number::Int(0), |acc, &n| add(acc, n, false)),
        "sqrt" => {
            arity(1)?;
            let x = args[0].as_f64();
            if x < 0.0 {
                return Err("sqrt() of a negative number".into());
            }
            Number::float(x.sqrt())
        }
        _ => Err(format!("Function {name} is not allowed")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), Number::Int(14));
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), Number::Int(20));
        assert_eq!(evaluate("2 ** 10").unwrap(), Number::Int(1024));
        assert_eq!(evaluate("-7 % 3").unwrap(), Number::Int(2));
    }

    #[test]
    fn division_produces_float() {
        assert_eq!(evaluate("10 / 4").unwrap(), Number::Float(2.5));
        assert_eq!(evaluate("10 / 2").unwrap(), Number::Float(5.0));
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_unary() {
        assert_eq!(evaluate("2 ** 3 ** 2").unwrap(), Number::Int(512));
        assert_eq!(evaluate("-2 ** 2").unwrap(), Number::Int(-4));
        assert_eq!(evaluate("2 ** -1").unwrap(), Number::Float(0.5));
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(evaluate("abs(-5)").unwrap(), Number::Int(5));
        assert_eq!(evaluate("max(1, 7.5, 3)").unwrap(), Number::Float(7.5));
        assert_eq!(evaluate("min(4, 2, 9)").unwrap(), Number::Int(2));
        assert_eq!(evaluate("sum(1, 2, 3)").unwrap(), Number::Int(6));
        assert_eq!(evaluate("round(2.5)").unwrap(), Number::Int(2));
        assert_eq!(evaluate("round(3.14159, 2)").unwrap(), Number::Float(3.14));
        assert_eq!(evaluate("sqrt(16)").unwrap(), Number::Float(4.0));
        assert!((evaluate("pi").unwrap().as_f64() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn errors_are_reported() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("5 % 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("import(1)").unwrap_err().contains("not allowed"));
        assert!(evaluate("9223372036854775807 + 1").unwrap_err().contains("overflow"));
    }

    #[test]
    fn modulo_takes_sign_of_divisor_without_overflow() {
        assert_eq!(evaluate("7 % -3").unwrap(), Number::Int(-2));
        assert_eq!(evaluate("-7 % -3").unwrap(), Number::Int(-1));
        assert_eq!(evaluate("(-9223372036854775807 - 1) % -1").unwrap(), Number::Int(0));
        assert_eq!(
            evaluate("9223372036854775806 % 9223372036854775807").unwrap(),
            Number::Int(9223372036854775806)
        );
        assert_eq!(
            evaluate("-9223372036854775806 % 9223372036854775807").unwrap(),
            Number::Int(1)
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&nested).unwrap_err(), "Expression nested too deeply");

        let negations = format!("{}1", "-".repeat(200_000));
        assert_eq!(evaluate(&negations).unwrap_err(), "Expression nested too deeply");

        let fine = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&fine).unwrap(), Number::Int(1));
    }

    #[tokio::test]
    async fn tool_execute() {
        let result = CalculatorTool
            .execute(json!({"expression": "2 + 3"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(result, json!({"expression": "2 + 3", "result": 5, "result_type": "int"}));
    }

    #[tokio::test]
    async fn tool_reports_float_type() {
        let result = CalculatorTool
            .execute(json!({"expression": "10 / 4"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(result["result"], 2.5);
        assert_eq!(result["result_type"], "float");
    }

    #[tokio::test]
    async fn tool_failure_is_execution_error() {
        let err = CalculatorTool
            .execute(json!({"expression": "1 / 0"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { ref reason, .. } if reason.contains("Division by zero")));
    }

    #[test]
    fn tool_schema() {
        let schema = CalculatorTool.to_schema();
        assert_eq!(schema.name, "calculate");
        assert_eq!(schema.parameters["required"], json!(["expression"]));
    }
}
