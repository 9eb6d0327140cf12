use crate::ast::{
    BinaryOp, BreakDecl, DomainDecl, EquationDecl, Expr, LockDecl, PairsDecl, ParticlesDecl,
    Placement, Program, SimulateDecl, StageDecl, SymbolDecl, SymbolDeclKind,
};
use crate::diagnostics::Span;
use crate::domain::{Boundary, PeriodicPolicy};
use crate::functions::Func;
use crate::tensor::Tensor;
use thiserror::Error;

/// Parse error with optional span information
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{message}")]
    SyntaxError {
        message: String,
        span: Option<Span>,
    },
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::SyntaxError {
            message: message.into(),
            span,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
            span: None,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::SyntaxError { span, .. } => *span,
        }
    }
}

/// Helper to track byte offsets while parsing
struct ParseContext {
    line_offsets: Vec<usize>, // Byte offset of start of each line
    len: usize,
}

impl ParseContext {
    fn new(source: &str) -> Self {
        let mut line_offsets = vec![0];
        let mut offset = 0;
        for ch in source.chars() {
            offset += ch.len_utf8();
            if ch == '\n' {
                line_offsets.push(offset);
            }
        }
        Self {
            line_offsets,
            len: source.len(),
        }
    }

    /// Get byte offset for start of line (0-indexed)
    fn line_start(&self, line: usize) -> usize {
        self.line_offsets.get(line).copied().unwrap_or(self.len)
    }

    /// Create a span for the entire line
    fn full_line_span(&self, line: usize) -> Span {
        let start = self.line_start(line);
        let end = self.line_start(line + 1);
        Span::new(start, end)
    }
}

/// Parse a simulation description
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let ctx = ParseContext::new(source);
    let mut domain = None;
    let mut particles = None;
    let mut symbols = Vec::new();
    let mut pairs = Vec::new();
    let mut locks = Vec::new();
    let mut stages = Vec::new();
    let mut simulate = None;
    let mut equation_count = 0;

    for (i, raw) in source.lines().enumerate() {
        let line = raw.trim();
        let span = Some(ctx.full_line_span(i));

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with("equation ") {
            equation_count += 1;
            let name = format!("eq{}", equation_count);
            stages.push(StageDecl::Equation(parse_equation_decl(line, name, span)?));
            continue;
        }

        let line = strip_comment(line);
        if line.starts_with("domain ") {
            if domain.is_some() {
                return Err(ParseError::new("Duplicate 'domain' declaration", span));
            }
            domain = Some(parse_domain(line, span)?);
        } else if line.starts_with("particles ") {
            if particles.is_some() {
                return Err(ParseError::new("Only one 'particles' declaration is allowed", span));
            }
            particles = Some(parse_particles(line, span)?);
        } else if line.starts_with("constant ")
            || line.starts_with("variable ")
            || line.starts_with("field ")
        {
            symbols.push(parse_symbol(line, span)?);
        } else if line.starts_with("pairs ") {
            pairs.push(parse_pairs(line, span)?);
        } else if line.starts_with("lock ") {
            locks.push(parse_lock(line, span)?);
        } else if line.starts_with("break ") {
            stages.push(StageDecl::Break(parse_break(line, span)?));
        } else if line.starts_with("simulate ") {
            simulate = Some(parse_simulate(line, span)?);
        } else {
            return Err(ParseError::new(
                format!("Unexpected token: {}", line.split_whitespace().next().unwrap_or("")),
                span,
            ));
        }
    }

    let simulate = simulate
        .ok_or_else(|| ParseError::message("Missing 'simulate' declaration".to_string()))?;

    Ok(Program {
        domain,
        particles,
        symbols,
        pairs,
        locks,
        stages,
        simulate,
    })
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => line[..pos].trim_end(),
        None => line,
    }
}

fn expect_keyword<'a>(line: &'a str, keyword: &str, span: Option<Span>) -> Result<&'a str, ParseError> {
    line.strip_prefix(keyword)
        .map(str::trim)
        .ok_or_else(|| ParseError::new(format!("Expected '{}' keyword", keyword), span))
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str, span: Option<Span>) -> Result<T, ParseError> {
    text.trim()
        .parse::<T>()
        .map_err(|_| ParseError::new(format!("Invalid {}: '{}'", what, text), span))
}

/// `a;b;c` as a list of numbers
fn parse_list<T: std::str::FromStr>(text: &str, what: &str, span: Option<Span>) -> Result<Vec<T>, ParseError> {
    text.split(';').map(|v| parse_number(v, what, span)).collect()
}

fn parse_tensor(text: &str, span: Option<Span>) -> Result<Tensor, ParseError> {
    text.parse::<Tensor>()
        .map_err(|e| ParseError::new(format!("Invalid tensor literal '{}': {}", text, e), span))
}

/// Parse `domain min <a;b> max <a;b> cell <a;b> boundary <kind>... [policy wrap|remove]`
fn parse_domain(line: &str, span: Option<Span>) -> Result<DomainDecl, ParseError> {
    let rest = expect_keyword(line, "domain", span)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut minimum = None;
    let mut maximum = None;
    let mut cell_size = None;
    let mut boundary = Vec::new();
    let mut policy = PeriodicPolicy::default();

    let mut k = 0;
    while k < tokens.len() {
        let value = |k: usize| {
            tokens.get(k + 1).copied().ok_or_else(|| {
                ParseError::new(format!("Expected a value after '{}' in domain", tokens[k]), span)
            })
        };
        match tokens[k] {
            "min" => minimum = Some(parse_list::<i32>(value(k)?, "grid bound", span)?),
            "max" => maximum = Some(parse_list::<i32>(value(k)?, "grid bound", span)?),
            "cell" => cell_size = Some(parse_list::<f64>(value(k)?, "cell size", span)?),
            "policy" => {
                policy = match value(k)? {
                    "wrap" => PeriodicPolicy::Wrap,
                    "remove" => PeriodicPolicy::Remove,
                    other => {
                        return Err(ParseError::new(
                            format!("Unknown periodic policy '{}' (expected wrap or remove)", other),
                            span,
                        ))
                    }
                }
            }
            "boundary" => {
                k += 1;
                while let Some(kind) = tokens.get(k) {
                    match *kind {
                        "periodic" => boundary.push(Boundary::Periodic),
                        "symmetric" => boundary.push(Boundary::Symmetric),
                        _ => break,
                    }
                    k += 1;
                }
                continue;
            }
            other => {
                return Err(ParseError::new(
                    format!("Unexpected '{}' in domain declaration", other),
                    span,
                ))
            }
        }
        k += 2;
    }

    let minimum = minimum.ok_or_else(|| ParseError::new("Expected 'min' in domain", span))?;
    let maximum = maximum.ok_or_else(|| ParseError::new("Expected 'max' in domain", span))?;
    let cell_size = cell_size.ok_or_else(|| ParseError::new("Expected 'cell' in domain", span))?;
    if boundary.is_empty() {
        boundary = vec![Boundary::Symmetric; minimum.len()];
    }
    if maximum.len() != minimum.len()
        || cell_size.len() != minimum.len()
        || boundary.len() != minimum.len()
    {
        return Err(ParseError::new(
            format!(
                "Domain axes disagree: min has {}, max {}, cell {}, boundary {}",
                minimum.len(),
                maximum.len(),
                cell_size.len(),
                boundary.len()
            ),
            span,
        ));
    }

    Ok(DomainDecl {
        minimum,
        maximum,
        cell_size,
        boundary,
        policy,
        span,
    })
}

/// Parse `particles <name> at <p>...` or `particles <name> lattice <origin> <spacing> <counts>`
fn parse_particles(line: &str, span: Option<Span>) -> Result<ParticlesDecl, ParseError> {
    let rest = expect_keyword(line, "particles", span)?;
    let mut tokens = rest.split_whitespace();
    let name = parse_identifier(tokens.next().unwrap_or(""), span)?;
    let placement = match tokens.next() {
        Some("at") => {
            let points = tokens
                .map(|t| parse_tensor(t, span))
                .collect::<Result<Vec<_>, _>>()?;
            Placement::At(points)
        }
        Some("lattice") => {
            let parts: Vec<&str> = tokens.collect();
            let [origin, spacing, counts] = parts[..] else {
                return Err(ParseError::new(
                    format!("Expected 'lattice <origin> <spacing> <counts>': {}", line),
                    span,
                ));
            };
            Placement::Lattice {
                origin: parse_tensor(origin, span)?,
                spacing: parse_number(spacing, "lattice spacing", span)?,
                counts: parse_list(counts, "particle count", span)?,
            }
        }
        _ => {
            return Err(ParseError::new(
                format!("Expected 'at' or 'lattice' in particles declaration: {}", line),
                span,
            ))
        }
    };
    Ok(ParticlesDecl {
        name,
        placement,
        span,
    })
}

/// Parse `constant [hidden] name = expr`, `variable name = expr [history N]`
/// or `field name = expr [history N] [antisymmetric]`
fn parse_symbol(line: &str, span: Option<Span>) -> Result<SymbolDecl, ParseError> {
    let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
    let (lhs, rhs) = rest
        .split_once('=')
        .ok_or_else(|| ParseError::new(format!("Expected '=' in {}: {}", keyword, line), span))?;

    let mut lhs_tokens: Vec<&str> = lhs.split_whitespace().collect();
    let hidden = keyword == "constant" && lhs_tokens.first() == Some(&"hidden");
    if hidden {
        lhs_tokens.remove(0);
    }
    let [name] = lhs_tokens[..] else {
        return Err(ParseError::new(format!("Expected a single name before '=': {}", line), span));
    };
    let name = parse_identifier(name, span)?;

    let mut words: Vec<&str> = rhs.split_whitespace().collect();
    let mut history = 1;
    let mut symmetric = true;
    loop {
        match words.as_slice() {
            [.., "antisymmetric"] if keyword == "field" => {
                symmetric = false;
                words.pop();
            }
            [.., "history", n] if keyword != "constant" => {
                history = parse_number::<usize>(n, "history depth", span)?;
                if history == 0 {
                    return Err(ParseError::new("History depth must be at least 1", span));
                }
                words.truncate(words.len() - 2);
            }
            _ => break,
        }
    }
    let init = parse_expression_at(&words.join(" "), span)?;

    let kind = match keyword {
        "constant" => SymbolDeclKind::Constant { hidden },
        "variable" => SymbolDeclKind::Variable,
        _ => SymbolDeclKind::Field { symmetric },
    };
    Ok(SymbolDecl {
        kind,
        name,
        init,
        history,
        span,
    })
}

/// Parse `pairs <name> within <radius>`
fn parse_pairs(line: &str, span: Option<Span>) -> Result<PairsDecl, ParseError> {
    let rest = expect_keyword(line, "pairs", span)?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let [name, "within", radius] = parts[..] else {
        return Err(ParseError::new(format!("Expected 'pairs <name> within <radius>': {}", line), span));
    };
    let radius: f64 = parse_number(radius, "pairing radius", span)?;
    if radius <= 0.0 {
        return Err(ParseError::new("Pairing radius must be positive", span));
    }
    Ok(PairsDecl {
        name: parse_identifier(name, span)?,
        radius,
        span,
    })
}

/// Parse `lock <field> <index>...`
fn parse_lock(line: &str, span: Option<Span>) -> Result<LockDecl, ParseError> {
    let rest = expect_keyword(line, "lock", span)?;
    let mut tokens = rest.split_whitespace();
    let field = parse_identifier(tokens.next().unwrap_or(""), span)?;
    let indices = tokens
        .map(|t| parse_number::<usize>(t, "particle index", span))
        .collect::<Result<Vec<_>, _>>()?;
    if indices.is_empty() {
        return Err(ParseError::new(format!("Expected particle indices to lock: {}", line), span));
    }
    Ok(LockDecl {
        field,
        indices,
        span,
    })
}

/// Parse `break <pairs> when <condition>`
fn parse_break(line: &str, span: Option<Span>) -> Result<BreakDecl, ParseError> {
    let rest = expect_keyword(line, "break", span)?;
    let (pairs, condition) = rest
        .split_once(" when ")
        .ok_or_else(|| ParseError::new(format!("Expected 'when' in break: {}", line), span))?;
    Ok(BreakDecl {
        pairs: parse_identifier(pairs.trim(), span)?,
        condition: parse_expression_at(condition, span)?,
        span,
    })
}

/// Parse `simulate end = T [threads = N] [seed = S]`
fn parse_simulate(line: &str, span: Option<Span>) -> Result<SimulateDecl, ParseError> {
    let rest = expect_keyword(line, "simulate", span)?;
    let normalized = rest.replace('=', " = ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let mut end_time = None;
    let mut threads = None;
    let mut seed = None;
    for setting in tokens.chunks(3) {
        let [key, "=", value] = setting else {
            return Err(ParseError::new(format!("Expected 'key = value' in simulate: {}", line), span));
        };
        match *key {
            "end" => end_time = Some(parse_number::<f64>(value, "end time", span)?),
            "threads" => {
                let n = parse_number::<usize>(value, "thread count", span)?;
                if n == 0 {
                    return Err(ParseError::new("Thread count must be at least 1", span));
                }
                threads = Some(n);
            }
            "seed" => seed = Some(parse_number::<u64>(value, "seed", span)?),
            other => {
                return Err(ParseError::new(format!("Unknown simulate setting '{}'", other), span))
            }
        }
    }
    let end_time = end_time.ok_or_else(|| ParseError::new(format!("Expected 'end =' in simulate: {}", line), span))?;
    Ok(SimulateDecl {
        end_time,
        threads,
        seed,
    })
}

fn parse_equation_decl(line: &str, name: String, span: Option<Span>) -> Result<EquationDecl, ParseError> {
    let text = expect_keyword(line, "equation", span)?;
    let (lhs, rhs, condition) = split_equation(text, span)?;
    Ok(EquationDecl {
        name,
        lhs: parse_identifier(lhs, span)?,
        rhs: parse_expression_at(rhs, span)?,
        condition: condition.map(|c| parse_expression_at(c, span)).transpose()?,
        source: text.to_string(),
        span,
    })
}

fn split_equation(text: &str, span: Option<Span>) -> Result<(&str, &str, Option<&str>), ParseError> {
    let (lhs, rest) = text
        .split_once('=')
        .ok_or_else(|| ParseError::new(format!("Expected '=' in equation: {}", text), span))?;
    let (rhs, condition) = match rest.split_once('#') {
        Some((rhs, cond)) => (rhs, Some(cond.trim())),
        None => (rest, None),
    };
    if condition == Some("") {
        return Err(ParseError::new("Empty condition after '#'", span));
    }
    Ok((lhs.trim(), rhs.trim(), condition))
}

/// Parse `lhs = rhs [# condition]` into its three parts
pub fn parse_equation(text: &str) -> Result<(String, Expr, Option<Expr>), ParseError> {
    let (lhs, rhs, condition) = split_equation(text, None)?;
    Ok((
        parse_identifier(lhs, None)?,
        parse_expression(rhs)?,
        condition.map(parse_expression).transpose()?,
    ))
}

/// Parse a single expression
pub fn parse_expression(s: &str) -> Result<Expr, ParseError> {
    parse_expression_at(s, None)
}

fn parse_identifier(s: &str, span: Option<Span>) -> Result<String, ParseError> {
    let s = s.trim();
    let mut chars = s.chars();
    let valid = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ParseError::new(format!("Invalid name '{}'", s), span));
    }
    Ok(s.to_string())
}

// ============================================================================
// Expressions
// ============================================================================

fn parse_expression_at(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::new("Expected an expression", span));
    }
    check_parens(s, span)?;
    parse_expr_add(s, span)
}

fn check_parens(s: &str, span: Option<Span>) -> Result<(), ParseError> {
    let mut depth = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(ParseError::new(format!("Unbalanced ')' in '{}'", s), span));
        }
    }
    if depth != 0 {
        return Err(ParseError::new(format!("Unclosed '(' in '{}'", s), span));
    }
    Ok(())
}

/// True if the `+`/`-` at byte `i` is a binary operator rather than a sign
/// or part of an exponent such as `1e-3`
fn is_binary_sign(s: &str, i: usize) -> bool {
    let before = s[..i].trim_end();
    let Some(prev) = before.chars().last() else {
        return false;
    };
    if "+-*/^:%(,;|".contains(prev) {
        return false;
    }
    if prev == 'e' || prev == 'E' {
        let start = before
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'))
            .map(|p| p + 1)
            .unwrap_or(0);
        let mantissa = &before[start..before.len() - 1];
        if mantissa.starts_with(|c: char| c.is_ascii_digit() || c == '.')
            && mantissa.parse::<f64>().is_ok()
        {
            return false;
        }
    }
    true
}

/// Parse addition/subtraction (lowest precedence)
/// Uses a simple recursive approach: find the rightmost + or - at depth 0
fn parse_expr_add(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();

    let mut paren_depth = 0;
    let mut split = None;
    for (i, ch) in s.char_indices().rev() {
        match ch {
            ')' => paren_depth += 1,
            '(' => paren_depth -= 1,
            '+' | '-' if paren_depth == 0 && is_binary_sign(s, i) => {
                split = Some((i, ch));
                break;
            }
            _ => {}
        }
    }

    match split {
        Some((pos, ch)) => {
            let op = if ch == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            Ok(Expr::Binary {
                op,
                left: Box::new(parse_expr_add(&s[..pos], span)?),
                right: Box::new(parse_expr_mul(&s[pos + 1..], span)?),
            })
        }
        None => parse_expr_mul(s, span),
    }
}

/// Parse `*`, `/`, `:` and `%`, left-associative
fn parse_expr_mul(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();

    let mut paren_depth = 0;
    let mut split = None;
    for (i, ch) in s.char_indices().rev() {
        match ch {
            ')' => paren_depth += 1,
            '(' => paren_depth -= 1,
            '*' | '/' | ':' | '%' if paren_depth == 0 => {
                split = Some((i, ch));
                break;
            }
            _ => {}
        }
    }

    match split {
        Some((pos, ch)) => {
            let op = match ch {
                '*' => BinaryOp::Mul,
                '/' => BinaryOp::Div,
                ':' => BinaryOp::Hadamard,
                _ => BinaryOp::TermDiv,
            };
            Ok(Expr::Binary {
                op,
                left: Box::new(parse_expr_mul(&s[..pos], span)?),
                right: Box::new(parse_expr_unary(&s[pos + 1..], span)?),
            })
        }
        None => parse_expr_unary(s, span),
    }
}

/// Parse unary signs; `-a^2` is `-(a^2)`
fn parse_expr_unary(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('-') {
        if !starts_numeric_tensor(s) {
            let inner = parse_expr_unary(rest, span)?;
            return Ok(Expr::UnaryMinus(Box::new(inner)));
        }
    }
    if let Some(rest) = s.strip_prefix('+') {
        return parse_expr_unary(rest, span);
    }
    parse_expr_pow(s, span)
}

/// A leading minus that belongs to the first element of a tensor literal
fn starts_numeric_tensor(s: &str) -> bool {
    has_top_level(s, &[';', '|']) && s.parse::<Tensor>().is_ok()
}

/// Parse `^`, right-associative
fn parse_expr_pow(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();

    let mut paren_depth = 0;
    let mut split = None;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            '^' if paren_depth == 0 => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }

    match split {
        Some(pos) => Ok(Expr::Binary {
            op: BinaryOp::Pow,
            left: Box::new(parse_expr_primary(&s[..pos], span)?),
            right: Box::new(parse_expr_unary(&s[pos + 1..], span)?),
        }),
        None => parse_expr_primary(s, span),
    }
}

fn has_top_level(s: &str, needles: &[char]) -> bool {
    let mut depth = 0;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if depth == 0 && needles.contains(&c) => return true,
            _ => {}
        }
    }
    false
}

/// Split call arguments on commas at paren depth 0
fn split_args(s: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                args.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(&s[start..]);
    args
}

/// Parse primary expressions: literals, variables, function calls, parentheses
fn parse_expr_primary(s: &str, span: Option<Span>) -> Result<Expr, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::new("Expected an operand", span));
    }

    // Tensor literal: 1;2;3|4;5;6
    if has_top_level(s, &[';', '|']) {
        return parse_tensor(s, span).map(Expr::Literal);
    }

    // Number literal; names like `inf` stay identifiers
    if s.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        let value = parse_number::<f64>(s, "number", span)?;
        return Ok(Expr::Literal(Tensor::scalar(value)));
    }

    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        return parse_expr_add(inner, span);
    }

    // Function call: ident(...)
    if let Some(paren_pos) = s.find('(') {
        let func_name = s[..paren_pos].trim();
        let Some(args_str) = s[paren_pos + 1..].strip_suffix(')') else {
            return Err(ParseError::new(format!("Unexpected text after ')' in '{}'", s), span));
        };
        let args: Vec<&str> = if args_str.trim().is_empty() {
            Vec::new()
        } else {
            split_args(args_str)
        };

        match func_name {
            "psum" => {
                let [pairs, body] = args[..] else {
                    return Err(ParseError::new("psum takes a pair list and a body", span));
                };
                return Ok(Expr::PairSum {
                    pairs: parse_identifier(pairs, span)?,
                    body: Box::new(parse_expr_add(body, span)?),
                });
            }
            "pval" => {
                let [series] = args[..] else {
                    return Err(ParseError::new("pval takes one series name", span));
                };
                return Ok(Expr::PairValue(parse_identifier(series, span)?));
            }
            _ => {}
        }

        let func = Func::from_name(func_name).ok_or_else(|| {
            ParseError::new(format!("Unknown function '{}'", func_name), span)
        })?;
        if !func.accepts(args.len()) {
            return Err(ParseError::new(
                format!("'{}' does not take {} argument(s)", func_name, args.len()),
                span,
            ));
        }
        let args = args
            .iter()
            .map(|arg| parse_expr_add(arg, span))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Call { func, args });
    }

    Ok(Expr::Var(parse_identifier(s, span)?))
}
