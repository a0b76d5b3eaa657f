//! Declarative Model Parser
//!
//! Recovers `ModelDefinition`s from model source text in three passes:
//! tokenize into logical lines, group class headers with their direct body
//! statements, then parse each statement's expressions.

mod expr;
mod lexer;

pub use expr::{Expr, ExprParser, Keyword};
pub use lexer::{tokenize, LogicalLine, Token, TokenKind};

use crate::error::ParseError;
use crate::models::{default_table_name, FieldDefinition, ModelDefinition, RelationshipDefinition};

/// Type used when neither the column call nor the annotation names one
pub const UNKNOWN_TYPE: &str = "Unknown";

/// Parser configured with the base classes that mark a declarative model
#[derive(Debug, Clone)]
pub struct ModelParser {
    base_classes: Vec<String>,
}

impl Default for ModelParser {
    fn default() -> Self {
        Self::new(["Base", "DeclarativeBase", "Model"])
    }
}

/// Class header plus the statements directly in its body
struct ClassBlock<'a> {
    name: String,
    bases: Vec<Expr>,
    statements: Vec<&'a [Token]>,
}

/// `target[: annotation] = value` inside a class body
struct Assignment<'a> {
    target: &'a str,
    annotation: Option<Expr>,
    value: Option<Expr>,
}

impl ModelParser {
    pub fn new<I, S>(base_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_classes: base_classes.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse every declarative model in `source`, in declaration order
    pub fn parse(&self, source: &str) -> Result<Vec<ModelDefinition>, ParseError> {
        let lines = tokenize(source)?;
        let models = class_blocks(&lines, source)?
            .into_iter()
            .filter(|block| self.is_model(block))
            .filter_map(|block| build_model(&block, source))
            .collect();
        Ok(models)
    }

    fn is_model(&self, block: &ClassBlock<'_>) -> bool {
        block.bases.iter().any(|base| match base {
            Expr::Name(name) => self.base_classes.iter().any(|b| {
                name == b || name.rsplit('.').next() == Some(b.as_str())
            }),
            _ => false,
        })
    }
}

fn class_blocks<'a>(lines: &'a [LogicalLine], source: &str) -> Result<Vec<ClassBlock<'a>>, ParseError> {
    let mut blocks = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let tokens = &line.tokens;
        if !(tokens.len() >= 2 && tokens[0].is_name("class") && tokens[1].kind == TokenKind::Name) {
            continue;
        }

        let mut parser = ExprParser::new(&tokens[2..], source);
        let bases = if parser.peek_op("(") {
            parser.advance();
            match parser.parse_arguments(")") {
                Some((bases, _)) => bases,
                None => return Err(ParseError::new(line.line, "malformed class bases")),
            }
        } else {
            Vec::new()
        };
        if !parser.peek_op(":") {
            return Err(ParseError::new(line.line, "expected ':' after class header"));
        }
        parser.advance();

        let mut statements = Vec::new();
        let inline = &tokens[2 + parser.position()..];
        if !inline.is_empty() {
            statements.extend(split_statements(inline));
        } else {
            let body_indent = lines
                .get(i + 1)
                .map(|l| l.indent)
                .filter(|indent| *indent > line.indent);
            if let Some(body_indent) = body_indent {
                for body_line in lines[i + 1..]
                    .iter()
                    .take_while(|l| l.indent > line.indent)
                    .filter(|l| l.indent == body_indent)
                {
                    statements.extend(split_statements(&body_line.tokens));
                }
            }
        }

        blocks.push(ClassBlock {
            name: tokens[1].text.clone(),
            bases,
            statements,
        });
    }

    Ok(blocks)
}

/// Split on top-level `;`
fn split_statements(tokens: &[Token]) -> Vec<&[Token]> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Op {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth = depth.saturating_sub(1),
            ";" if depth == 0 => {
                if i > start {
                    out.push(&tokens[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        out.push(&tokens[start..]);
    }
    out
}

fn parse_assignment<'a>(tokens: &'a [Token], source: &str) -> Option<Assignment<'a>> {
    let target = tokens.first().filter(|t| t.kind == TokenKind::Name)?;
    let mut parser = ExprParser::new(&tokens[1..], source);

    let annotation = if parser.peek_op(":") {
        parser.advance();
        Some(parser.parse_expr(&["="]))
    } else {
        None
    };

    let value = if parser.peek_op("=") {
        parser.advance();
        Some(parser.parse_expr(&[]))
    } else if annotation.is_some() && parser.at_end() {
        None
    } else {
        return None;
    };

    Some(Assignment {
        target: &target.text,
        annotation,
        value,
    })
}

fn build_model(block: &ClassBlock<'_>, source: &str) -> Option<ModelDefinition> {
    let mut table_name = None;
    let mut fields = Vec::new();
    let mut relationships = Vec::new();

    for statement in &block.statements {
        let Some(assignment) = parse_assignment(statement, source) else {
            continue;
        };
        let Some(value) = assignment.value.as_ref() else {
            // `bio: Mapped[str | None]` is a column without any call
            if let Some(field) = assignment
                .annotation
                .as_ref()
                .and_then(|annotation| annotated_field(assignment.target, annotation))
            {
                fields.push(field);
            }
            continue;
        };

        match assignment.target {
            "__tablename__" => {
                if let Expr::Str(name) = value {
                    table_name = Some(name.clone());
                }
            }
            "__abstract__" if value.as_bool() == Some(true) => return None,
            target => {
                if value.is_call_to("Column") || value.is_call_to("mapped_column") {
                    fields.push(build_field(target, assignment.annotation.as_ref(), value));
                } else if value.is_call_to("relationship") {
                    if let Some(target_class) =
                        relationship_target(value, assignment.annotation.as_ref())
                    {
                        relationships.push(RelationshipDefinition {
                            name: target.to_string(),
                            target: target_class,
                        });
                    }
                }
            }
        }
    }

    if fields.is_empty() {
        return None;
    }

    Some(ModelDefinition {
        table_name: table_name.unwrap_or_else(|| default_table_name(&block.name)),
        class_name: block.name.clone(),
        fields,
        relationships,
    })
}

fn build_field(attr_name: &str, annotation: Option<&Expr>, call: &Expr) -> FieldDefinition {
    let is_mapped_column = call.is_call_to("mapped_column");
    let mut args = call.args();

    // Column("explicit_name", Type, ...)
    let mut name = attr_name.to_string();
    if let Some(Expr::Str(explicit)) = args.first() {
        name = explicit.clone();
        args = &args[1..];
    }

    let mut field = FieldDefinition::new(name, UNKNOWN_TYPE);

    for arg in args {
        if arg.is_call_to("ForeignKey") {
            if field.foreign_key.is_none() {
                field.foreign_key = arg.args().first().map(|target| match target {
                    Expr::Str(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        } else if field.column_type == UNKNOWN_TYPE && is_type_expr(arg) {
            field.column_type = arg.to_string();
        }
    }

    let mapped = annotation.and_then(mapped_inner);
    if field.column_type == UNKNOWN_TYPE {
        if let Some((inner, _)) = &mapped {
            if let Some(inferred) = infer_type(inner) {
                field.column_type = inferred;
            }
        }
    }

    let flag = |key: &str| call.kwarg(key).and_then(Expr::as_bool);
    field.primary_key = flag("primary_key").unwrap_or(false);
    field.unique = flag("unique").unwrap_or(false);
    field.index = flag("index").unwrap_or(false);
    field.nullable = match flag("nullable") {
        Some(explicit) => explicit,
        None if is_mapped_column => mapped.as_ref().is_some_and(|(_, optional)| *optional),
        None => true,
    };

    field.default = ["default", "server_default"]
        .iter()
        .filter_map(|key| call.kwarg(key))
        .find(|value| !value.is_none())
        .map(ToString::to_string);

    field
}

/// Field declared by a bare `Mapped[...]` annotation
fn annotated_field(attr_name: &str, annotation: &Expr) -> Option<FieldDefinition> {
    let (inner, optional) = mapped_inner(annotation)?;
    let mut field = FieldDefinition::new(attr_name, infer_type(&inner)?);
    field.nullable = optional;
    Some(field)
}

fn is_type_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Name(_) => true,
        Expr::Call { func, .. } => matches!(func.as_ref(), Expr::Name(_)),
        _ => false,
    }
}

/// `Mapped[T]` -> `(T, optional)`; `Optional[T]` and `T | None` count as optional
fn mapped_inner(annotation: &Expr) -> Option<(Expr, bool)> {
    let Expr::Subscript { value, index } = annotation else {
        return None;
    };
    if value.simple_name() != Some("Mapped") || index.len() != 1 {
        return None;
    }

    let inner = &index[0];
    match inner {
        Expr::Subscript { value, index }
            if value.simple_name() == Some("Optional") && index.len() == 1 =>
        {
            Some((index[0].clone(), true))
        }
        Expr::Union(parts) if parts.iter().any(Expr::is_none) => {
            let rest: Vec<Expr> = parts.iter().filter(|p| !p.is_none()).cloned().collect();
            let inner = match rest.len() {
                1 => rest.into_iter().next()?,
                _ => Expr::Union(rest),
            };
            Some((inner, true))
        }
        other => Some((other.clone(), false)),
    }
}

/// Column type implied by a `Mapped[...]` annotation
fn infer_type(annotation: &Expr) -> Option<String> {
    let name = match annotation {
        Expr::Name(name) => name.as_str(),
        Expr::Subscript { value, .. } => match value.simple_name()? {
            "dict" | "Dict" => return Some("JSON".to_string()),
            "list" | "List" => return Some("ARRAY".to_string()),
            _ => return None,
        },
        _ => return None,
    };

    let mapped = match name.rsplit('.').next().unwrap_or(name) {
        "int" => "Integer",
        "str" => "String",
        "bool" => "Boolean",
        "float" => "Float",
        "datetime" => "DateTime",
        "date" => "Date",
        "time" => "Time",
        "Decimal" => "Numeric",
        "dict" => "JSON",
        "bytes" => "LargeBinary",
        "UUID" | "uuid" => "Uuid",
        other => other,
    };
    Some(mapped.to_string())
}

fn relationship_target(call: &Expr, annotation: Option<&Expr>) -> Option<String> {
    match call.args().first() {
        Some(Expr::Str(target)) => return Some(target.clone()),
        Some(Expr::Name(target)) => return Some(target.clone()),
        _ => {}
    }

    // Mapped["User"], Mapped[List["Order"]], Mapped[list[Order]]
    let (mut inner, _) = mapped_inner(annotation?)?;
    loop {
        match inner {
            Expr::Str(target) | Expr::Name(target) => return Some(target),
            Expr::Subscript { index, .. } if index.len() == 1 => {
                inner = index.into_iter().next()?;
            }
            _ => return None,
        }
    }
}
