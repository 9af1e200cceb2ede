//! Surface syntax parsing using nom
//!
//! Turns PostgREST-style query parameters into a [`SelectionNode`]:
//!
//! ```text
//! select=name,section_id,section:orchestral_sections!inner(id,name)
//! section_id=eq.2
//! section.name=ilike.*wood*
//! order=name.desc.nullslast
//! limit=10
//! ```

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, value},
    multi::{many0, separated_list0},
    sequence::{delimited, preceded, terminated},
};

use crate::error::{Error, Result};
use crate::selection::{
    ColumnRef, EmbedJoin, EmbedNode, FilterClause, FilterOp, NullsOrder, OrderTerm, SelectItem,
    Selection, SelectionNode,
};
use crate::value::SqlValue;

// =============================================================================
// Select list
// =============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Bare or double-quoted identifier
fn identifier(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('"'), is_not("\""), char('"')), str::to_string),
        map(take_while1(is_ident_char), str::to_string),
    ))
    .parse(input)
}

/// `alias:` prefix
fn alias_prefix(input: &str) -> IResult<&str, String> {
    terminated(identifier, char(':')).parse(input)
}

/// Parses one item of a select list: `*`, `[alias:]column` or
/// `[alias:]name[!hint][!inner|!left](items)`.
fn select_item(input: &str) -> IResult<&str, RawItem> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>('*').parse(input) {
        let (rest, _) = multispace0(rest)?;
        return Ok((rest, RawItem::Star));
    }

    let (input, alias) = opt(alias_prefix).parse(input)?;
    let (input, name) = identifier(input)?;
    let (input, marks) = many0(preceded(char('!'), identifier)).parse(input)?;
    let (input, children) = opt(delimited(
        char('('),
        separated_list0(char(','), select_item),
        char(')'),
    ))
    .parse(input)?;
    let (input, _) = multispace0(input)?;

    let item = match children {
        Some(children) => RawItem::Embed {
            alias,
            name,
            marks,
            children,
        },
        None => RawItem::Column { alias, name, marks },
    };
    Ok((input, item))
}

/// Parse tree before hint validation.
#[derive(Debug)]
enum RawItem {
    Star,
    Column {
        alias: Option<String>,
        name: String,
        marks: Vec<String>,
    },
    Embed {
        alias: Option<String>,
        name: String,
        marks: Vec<String>,
        children: Vec<RawItem>,
    },
}

fn lower_items(raw: Vec<RawItem>) -> Result<Vec<SelectItem>> {
    if raw.is_empty() {
        return Ok(vec![SelectItem::Star]);
    }
    raw.into_iter().map(lower_item).collect()
}

fn lower_item(raw: RawItem) -> Result<SelectItem> {
    match raw {
        RawItem::Star => Ok(SelectItem::Star),
        RawItem::Column { alias, name, marks } => {
            if !marks.is_empty() {
                return Err(Error::parse(
                    "select",
                    format!("hint on column \"{name}\" requires an embedded resource"),
                ));
            }
            Ok(SelectItem::Column(ColumnRef { name, alias }))
        }
        RawItem::Embed {
            alias,
            name,
            marks,
            children,
        } => {
            let mut embed = EmbedNode::new(name);
            embed.alias = alias;
            for mark in marks {
                match mark.as_str() {
                    "inner" => embed.join = EmbedJoin::Inner,
                    "left" => embed.join = EmbedJoin::Left,
                    _ if embed.hint.is_some() => {
                        return Err(Error::parse(
                            "select",
                            format!("more than one hint on \"{}\"", embed.name),
                        ));
                    }
                    _ => embed.hint = Some(mark),
                }
            }
            embed.body.items = lower_items(children)?;
            Ok(SelectItem::Embed(embed))
        }
    }
}

/// Deepest embed nesting the select grammar accepts. The planner applies the
/// configured `max_embed_depth` afterwards; this cap only bounds recursion.
pub const MAX_SELECT_DEPTH: usize = 64;

/// Deepest parenthesis nesting in a select list, skipping quoted identifiers.
fn nesting_depth(input: &str) -> usize {
    let (mut depth, mut deepest, mut quoted) = (0usize, 0usize, false);
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' if !quoted => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Parses a `select` parameter value.
pub fn parse_select(input: &str) -> Result<Vec<SelectItem>> {
    if input.trim().is_empty() {
        return Ok(vec![SelectItem::Star]);
    }
    if nesting_depth(input) > MAX_SELECT_DEPTH {
        return Err(Error::parse(
            "select",
            format!("embeds nested deeper than {MAX_SELECT_DEPTH} levels"),
        ));
    }
    let (_, raw) = all_consuming(separated_list0(char(','), select_item))
        .parse(input)
        .map_err(|e| Error::parse("select", describe(input, e)))?;
    lower_items(raw)
}

fn describe(input: &str, err: nom::Err<nom::error::Error<&str>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len() - e.input.len();
            format!("unexpected input at position {offset}: \"{}\"", e.input)
        }
        nom::Err::Incomplete(_) => "unexpected end of input".to_string(),
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Element of an `in.(...)` list: double-quoted with backslash escapes, or bare.
fn list_value(input: &str) -> IResult<&str, String> {
    alt((
        delimited(
            char('"'),
            escaped_transform(
                is_not("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            ),
            char('"'),
        ),
        map(opt(is_not(",)")), |s: Option<&str>| {
            s.unwrap_or_default().trim().to_string()
        }),
    ))
    .parse(input)
}

fn value_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(char('('), separated_list0(char(','), list_value), char(')')).parse(input)
}

/// Parses a filter value such as `eq.2`, `not.in.(1,2)` or `is.null`.
pub fn parse_filter(column: &str, expr: &str) -> Result<FilterClause> {
    let err = |msg: &str| Error::parse(format!("filter on \"{column}\""), msg);

    let (negated, expr) = match expr.strip_prefix("not.") {
        Some(rest) => (true, rest),
        None => (false, expr),
    };
    let (op_name, operand) = expr
        .split_once('.')
        .ok_or_else(|| err("expected <operator>.<value>"))?;

    let (op, values) = match op_name {
        "eq" => (FilterOp::Eq, vec![text(operand)]),
        "neq" => (FilterOp::Neq, vec![text(operand)]),
        "gt" => (FilterOp::Gt, vec![text(operand)]),
        "gte" => (FilterOp::Gte, vec![text(operand)]),
        "lt" => (FilterOp::Lt, vec![text(operand)]),
        "lte" => (FilterOp::Lte, vec![text(operand)]),
        "like" => (FilterOp::Like, vec![text(operand)]),
        "ilike" => (FilterOp::ILike, vec![text(operand)]),
        "in" => {
            let (_, items) = all_consuming(value_list)
                .parse(operand)
                .map_err(|e| err(&describe(operand, e)))?;
            (FilterOp::In, items.into_iter().map(SqlValue::Text).collect())
        }
        "is" => match operand.to_ascii_lowercase().as_str() {
            "null" => (FilterOp::IsNull, Vec::new()),
            "true" => (FilterOp::IsTrue, Vec::new()),
            "false" => (FilterOp::IsFalse, Vec::new()),
            other => return Err(err(&format!("unknown is value \"{other}\""))),
        },
        other => return Err(err(&format!("unknown operator \"{other}\""))),
    };

    Ok(FilterClause {
        column: column.to_string(),
        op,
        negated,
        values,
    })
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

// =============================================================================
// Ordering
// =============================================================================

/// Parses an `order` parameter value: `col[.asc|.desc][.nullsfirst|.nullslast],...`
pub fn parse_order(input: &str) -> Result<Vec<OrderTerm>> {
    let mut terms = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut segments = part.split('.');
        let column = segments.next().unwrap_or_default();
        if column.is_empty() || !column.chars().all(is_ident_char) {
            return Err(Error::parse("order", format!("invalid column \"{column}\"")));
        }
        let mut term = OrderTerm::asc(column);
        for seg in segments {
            match seg {
                "asc" => term.descending = false,
                "desc" => term.descending = true,
                "nullsfirst" => term.nulls = Some(NullsOrder::First),
                "nullslast" => term.nulls = Some(NullsOrder::Last),
                other => {
                    return Err(Error::parse("order", format!("unknown modifier \"{other}\"")));
                }
            }
        }
        terms.push(term);
    }
    Ok(terms)
}

// =============================================================================
// Whole request
// =============================================================================

fn parse_count(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::parse(key, format!("expected a non-negative integer, got \"{value}\"")))
}

/// Walks `path` (embed output keys) down from `body`.
fn scope_mut<'a>(body: &'a mut Selection, path: &[&str]) -> Result<&'a mut Selection> {
    let mut scope = body;
    for key in path {
        scope = &mut scope
            .embed_mut(key)
            .ok_or_else(|| {
                Error::InvalidRequest(format!("\"{key}\" is not an embedded resource of the select"))
            })?
            .body;
    }
    Ok(scope)
}

/// Builds a [`SelectionNode`] for `table` from query-string pairs.
///
/// `select` defaults to `*`. `order`, `limit` and `offset` may be prefixed with
/// an embed path (`instruments.order=name`); every other key is a filter whose
/// dotted prefix addresses an embed.
pub fn parse_request<I, K, V>(table: &str, params: I) -> Result<SelectionNode>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let params: Vec<(K, V)> = params.into_iter().collect();

    let mut node = SelectionNode::new(table);
    let select = params
        .iter()
        .find(|(k, _)| k.as_ref() == "select")
        .map(|(_, v)| v.as_ref())
        .unwrap_or("*");
    node.body.items = parse_select(select)?;

    for (key, value) in &params {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key == "select" {
            continue;
        }
        let segments: Vec<&str> = key.split('.').collect();
        let (last, path) = segments
            .split_last()
            .ok_or_else(|| Error::parse("query", "empty parameter name"))?;
        let scope = scope_mut(&mut node.body, path)?;

        match *last {
            "order" => scope.order = parse_order(value)?,
            "limit" => scope.limit = Some(parse_count(key, value)?),
            "offset" => scope.offset = Some(parse_count(key, value)?),
            column => scope.filters.push(parse_filter(column, value)?),
        }
    }

    Ok(node)
}
