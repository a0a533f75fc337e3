//! 规则脚本解析器
//!
//! 脚本由若干规则组成：
//!
//! ```text
//! // 行注释
//! rule "<名称>" ["<描述>"] [salience <整数>]
//! begin
//!     <规则体>
//! end
//! ```
//!
//! 规则体对构建器是不透明的，解析器只负责定位到匹配的 `end`。
//! 遇到语法错误后跳过失败规则的剩余部分，从下一条规则处恢复，保证一次解析报告全部错误。

use super::{FrontEnd, GrammarError, ParseOutcome, SemanticError};
use crate::entity::{RuleBody, RuleEntity};
use nom::{
    IResult, Offset,
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1, multispace1, satisfy},
    combinator::{map, not, opt, recognize},
    error::{Error, ErrorKind},
    multi::many0_count,
    sequence::{delimited, pair, terminated},
};
use std::collections::HashMap;

/// 默认前端实现
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl ScriptParser {
    pub fn new() -> Self {
        Self
    }
}

impl FrontEnd for ScriptParser {
    fn parse(&self, source: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut parsed = Vec::new();

        // 语法阶段
        let mut rest = skip_trivia(source);
        while !rest.is_empty() {
            match rule_definition(rest) {
                Ok((next, raw)) => {
                    parsed.push(raw);
                    rest = skip_trivia(next);
                }
                Err(failure) => {
                    let (line, column) = line_col(source, source.offset(failure.at));
                    outcome
                        .grammar_errors
                        .push(GrammarError::new(line, column, failure.message));
                    rest = skip_trivia(resync(failure.at));
                }
            }
        }

        // 语义阶段
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        for raw in parsed {
            let line = line_col(source, source.offset(raw.start)).0;
            let name = raw.name.trim();
            let mut errors = Vec::new();

            if name.is_empty() {
                outcome
                    .semantic_errors
                    .push(SemanticError::new(None, line, "规则名称不能为空"));
                continue;
            }

            let salience = match raw.salience {
                None => 0,
                Some(text) => text.parse::<i64>().unwrap_or_else(|_| {
                    errors.push(format!("优先级 {} 超出范围", text));
                    0
                }),
            };

            if let Err(msg) = check_brackets(raw.body) {
                errors.push(msg);
            }

            if let Some(first) = first_seen.get(name) {
                errors.push(format!("规则名称重复，首次定义于第 {} 行", first));
            } else {
                first_seen.insert(name, line);
            }

            if !errors.is_empty() {
                outcome.semantic_errors.extend(
                    errors
                        .into_iter()
                        .map(|msg| SemanticError::new(Some(name.to_string()), line, msg)),
                );
                continue;
            }

            let body = raw.body.trim();
            let body_line = line_col(source, source.offset(body)).0;
            let entity = RuleEntity::new(name, salience, RuleBody::new(body, body_line))
                .with_description(raw.description.unwrap_or_default());
            outcome.rules.insert(name.to_string(), entity);
        }

        outcome
    }
}

/// 语法阶段得到的规则片段
struct RawRule<'a> {
    start: &'a str,
    name: &'a str,
    description: Option<&'a str>,
    salience: Option<&'a str>,
    body: &'a str,
}

/// 语法失败位置
struct Failure<'a> {
    at: &'a str,
    message: &'static str,
}

fn rule_definition(input: &str) -> Result<(&str, RawRule<'_>), Failure<'_>> {
    let start = input;
    let (rest, _) = expect(input, keyword("rule"), "期望关键字 `rule`")?;
    let (rest, name) = expect(skip_trivia(rest), quoted, "期望规则名称字符串")?;
    let rest = skip_trivia(rest);

    let (rest, description) = match quoted(rest) {
        Ok((next, text)) => (skip_trivia(next), Some(text)),
        Err(_) => (rest, None),
    };

    let (rest, salience) = match keyword("salience")(rest) {
        Ok((next, _)) => {
            let (next, value) = expect(skip_trivia(next), integer, "`salience` 后期望整数")?;
            (skip_trivia(next), Some(value))
        }
        Err(_) => (rest, None),
    };

    let (rest, _) = expect(rest, keyword("begin"), "期望关键字 `begin`")?;
    let (rest, body) = expect(rest, rule_body, "规则体缺少结束关键字 `end`")?;

    Ok((
        rest,
        RawRule {
            start,
            name,
            description,
            salience,
            body,
        },
    ))
}

fn expect<'a, O, P>(
    input: &'a str,
    mut parser: P,
    message: &'static str,
) -> Result<(&'a str, O), Failure<'a>>
where
    P: FnMut(&'a str) -> IResult<&'a str, O>,
{
    parser(input).map_err(|_| Failure { at: input, message })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        map(opt(is_not("\"\r\n")), Option::unwrap_or_default),
        char('"'),
    )(input)
}

fn integer(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1))(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), opt(is_not("\r\n"))))(input)
}

/// 跳过空白和行注释
fn skip_trivia(input: &str) -> &str {
    many0_count(alt((multispace1, line_comment)))(input).map_or(input, |(rest, _)| rest)
}

/// 规则体：直到字符串和注释之外的第一个 `end` 关键字
fn rule_body(input: &str) -> IResult<&str, &str> {
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    let mut prev: Option<char> = None;

    for (i, c) in input.char_indices() {
        if in_comment {
            in_comment = c != '\n';
        } else if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '/' if input[i..].starts_with("//") => in_comment = true,
                'e' if input[i..].starts_with("end")
                    && !prev.is_some_and(|p| is_ident_char(p) || p == '.')
                    && !input[i + 3..].chars().next().is_some_and(is_ident_char) =>
                {
                    return Ok((&input[i + 3..], &input[..i]));
                }
                _ => {}
            }
        }
        prev = Some(c);
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)))
}

/// 从失败位置恢复
///
/// 失败规则的 `begin` 仍在前方时先跳过它的规则体，
/// 避免把规则体中的 `rule` 当作新规则的开始；否则定位到下一个 `rule` 关键字。
fn resync(at: &str) -> &str {
    match next_keyword(at) {
        Some((i, "begin")) => match rule_body(&at[i + "begin".len()..]) {
            Ok((rest, _)) => rest,
            Err(_) => next_rule(&at[i..]),
        },
        Some((i, _)) => &at[i..],
        None => &at[at.len()..],
    }
}

/// 字符串和注释之外的下一个 `begin` 或 `rule` 关键字，`rule` 不能位于起始处
fn next_keyword(at: &str) -> Option<(usize, &'static str)> {
    let mut in_string = false;
    let mut in_comment = false;
    let mut prev: Option<char> = None;

    for (i, c) in at.char_indices() {
        if in_comment {
            in_comment = c != '\n';
        } else if in_string {
            in_string = c != '"';
        } else if c == '"' {
            in_string = true;
        } else if c == '/' && at[i..].starts_with("//") {
            in_comment = true;
        } else if !prev.is_some_and(is_ident_char) {
            let found = ["begin", "rule"].into_iter().find(|kw| {
                at[i..].starts_with(kw)
                    && !at[i + kw.len()..].chars().next().is_some_and(is_ident_char)
            });
            match found {
                Some("rule") if i == 0 => {}
                Some(kw) => return Some((i, kw)),
                None => {}
            }
        }
        prev = Some(c);
    }
    None
}

/// 失败位置之后的下一个 `rule` 关键字
fn next_rule(at: &str) -> &str {
    let mut prev: Option<char> = None;
    for (i, c) in at.char_indices() {
        if i > 0
            && c == 'r'
            && at[i..].starts_with("rule")
            && !prev.is_some_and(is_ident_char)
            && !at[i + 4..].chars().next().is_some_and(is_ident_char)
        {
            return &at[i..];
        }
        prev = Some(c);
    }
    &at[at.len()..]
}

/// 检查规则体中的括号是否配对
fn check_brackets(body: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => in_comment = true,
            '{' | '(' | '[' => stack.push(c),
            '}' | ')' | ']' => {
                let open = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("括号不匹配: 意外的 `{}`", c));
                }
            }
            _ => {}
        }
    }

    if in_string {
        return Err("字符串未闭合".to_string());
    }
    match stack.last() {
        Some(open) => Err(format!("括号未闭合: `{}`", open)),
        None => Ok(()),
    }
}

/// 偏移量转换为从 1 开始的行列号
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseOutcome {
        ScriptParser::new().parse(source)
    }

    #[test]
    fn test_parse_rules_in_source_order() {
        let outcome = parse(
            r#"
            // 会员规则
            rule "vip" "VIP 会员" salience 10
            begin
                if user.level == "gold" { discount = 0.8 }
            end

            rule "newcomer" salience -3 begin greet() end
            rule "plain" begin end
            "#,
        );

        assert!(!outcome.has_errors(), "{:?}", outcome.grammar_errors);
        let names: Vec<&str> = outcome.rules.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["vip", "newcomer", "plain"]);

        let vip = &outcome.rules["vip"];
        assert_eq!(vip.salience(), 10);
        assert_eq!(vip.description(), "VIP 会员");
        assert_eq!(vip.body().source, r#"if user.level == "gold" { discount = 0.8 }"#);
        assert_eq!(vip.body().line, 5);

        assert_eq!(outcome.rules["newcomer"].salience(), -3);
        assert_eq!(outcome.rules["plain"].salience(), 0);
        assert_eq!(outcome.rules["plain"].body().source, "");
    }

    #[test]
    fn test_end_inside_string_or_identifier_is_body() {
        let outcome = parse(
            r#"rule "r" begin
                msg = "the end"
                endpoint = weekend
                // end of comment
                x.end()
            end"#,
        );

        assert!(!outcome.has_errors());
        let body = &outcome.rules["r"].body().source;
        assert!(body.contains("\"the end\""));
        assert!(body.contains("endpoint = weekend"));
        assert!(body.ends_with("x.end()"));
    }

    #[test]
    fn test_grammar_errors_are_aggregated() {
        let outcome = parse(
            "rule missing_quotes begin end\n\
             rule \"ok\" begin end\n\
             rule \"bad\" salience high begin end\n\
             rule \"unterminated\" begin x = 1\n",
        );

        assert_eq!(outcome.grammar_errors.len(), 3, "{:?}", outcome.grammar_errors);
        assert_eq!(outcome.grammar_errors[0].line, 1);
        assert_eq!(outcome.grammar_errors[0].column, 6);
        assert!(outcome.grammar_errors[0].message.contains("名称"));
        assert_eq!(outcome.grammar_errors[1].line, 3);
        assert!(outcome.grammar_errors[1].message.contains("salience"));
        assert_eq!(outcome.grammar_errors[2].line, 4);
        assert!(outcome.grammar_errors[2].message.contains("end"));

        assert!(outcome.rules.contains_key("ok"));
    }

    #[test]
    fn test_recovery_skips_body_of_failed_rule() {
        let outcome = parse("rule \"a\" salience x begin\n rule = 1\nend\nrule \"b\" begin end");

        assert_eq!(outcome.grammar_errors.len(), 1, "{:?}", outcome.grammar_errors);
        assert_eq!(outcome.grammar_errors[0].line, 1);
        assert_eq!(outcome.grammar_errors[0].column, 19);
        assert!(outcome.grammar_errors[0].message.contains("salience"));
        assert!(outcome.rules.contains_key("b"));
        assert!(!outcome.rules.contains_key("a"));
    }

    #[test]
    fn test_recovery_does_not_consume_next_rule_body() {
        let outcome = parse(
            "rule \"a\" salience x\n\
             rule \"b\" begin b() end\n\
             rule \"c\" \"描述里的 rule\" salience oops begin // rule\n c() end\n\
             rule \"d\" begin end",
        );

        assert_eq!(outcome.grammar_errors.len(), 2, "{:?}", outcome.grammar_errors);
        assert_eq!(outcome.grammar_errors[0].line, 1);
        assert_eq!(outcome.grammar_errors[1].line, 3);
        let names: Vec<&str> = outcome.rules.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "d"]);
    }

    #[test]
    fn test_garbage_before_first_rule() {
        let outcome = parse("garbage here\nrule \"a\" begin end");

        assert_eq!(outcome.grammar_errors.len(), 1);
        assert_eq!(outcome.grammar_errors[0].line, 1);
        assert_eq!(outcome.grammar_errors[0].column, 1);
        assert!(outcome.rules.contains_key("a"));
    }

    #[test]
    fn test_keyword_requires_boundary() {
        let outcome = parse("rules \"a\" begin end");
        assert_eq!(outcome.grammar_errors.len(), 1);
        assert!(outcome.rules.is_empty());
    }

    #[test]
    fn test_semantic_errors_are_aggregated() {
        let outcome = parse(
            r#"
            rule "dup" salience 1 begin a() end
            rule "dup" salience 2 begin b() end
            rule "" begin end
            rule "huge" salience 99999999999999999999 begin end
            rule "braces" begin if x { y( } end
            "#,
        );

        assert!(outcome.grammar_errors.is_empty());
        assert_eq!(outcome.semantic_errors.len(), 4, "{:?}", outcome.semantic_errors);

        let dup = &outcome.semantic_errors[0];
        assert_eq!(dup.rule.as_deref(), Some("dup"));
        assert!(dup.message.contains("重复"));
        assert!(dup.message.contains("第 2 行"));

        assert!(outcome.semantic_errors[1].rule.is_none());
        assert!(outcome.semantic_errors[2].message.contains("超出范围"));
        assert!(outcome.semantic_errors[3].message.contains("括号"));

        // 首次定义仍被保留，但有错误时整个结果不会被使用
        assert_eq!(outcome.rules["dup"].salience(), 1);
    }

    #[test]
    fn test_empty_source() {
        let outcome = parse("  \n // 只有注释\n");
        assert!(!outcome.has_errors());
        assert!(outcome.rules.is_empty());
    }

    #[test]
    fn test_check_brackets() {
        assert!(check_brackets("if a { b(c[0]) }").is_ok());
        assert!(check_brackets(r#"s = "{(""#).is_ok());
        assert!(check_brackets("// {\nx()").is_ok());
        assert!(check_brackets("a(]").is_err());
        assert!(check_brackets("{").is_err());
        assert!(check_brackets(r#"s = "open"#).is_err());
    }

    #[test]
    fn test_line_col() {
        let src = "ab\ncd\n规则x";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 4), (2, 2));
        assert_eq!(line_col(src, src.len() - 1), (3, 3));
    }
}
