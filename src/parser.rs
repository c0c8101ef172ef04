use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind, Tokenizer};
use std::collections::HashMap;
use tracing::debug;

/// An open control construct waiting for its end tag.
enum Frame {
    If {
        first: (VarExpr, Vec<Node>),
        elifs: Vec<(VarExpr, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
        line: usize,
    },
    For {
        target: String,
        iterable: VarExpr,
        body: Vec<Node>,
        line: usize,
    },
    Block {
        name: String,
        body: Vec<Node>,
        has_super: bool,
        line: usize,
    },
}

impl Frame {
    fn keyword(&self) -> &'static str {
        match self {
            Frame::If { .. } => "if",
            Frame::For { .. } => "for",
            Frame::Block { .. } => "block",
        }
    }

    fn line(&self) -> usize {
        match self {
            Frame::If { line, .. } | Frame::For { line, .. } | Frame::Block { line, .. } => *line,
        }
    }

    fn body_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Frame::If {
                else_body: Some(body),
                ..
            } => body,
            Frame::If { first, elifs, .. } => match elifs.last_mut() {
                Some((_, body)) => body,
                None => &mut first.1,
            },
            Frame::For { body, .. } | Frame::Block { body, .. } => body,
        }
    }
}

/// Builds a [`Template`] from source text in one forward scan, matching
/// open and close tags with an explicit stack.
pub struct Parser<'a> {
    lexer: Tokenizer<'a>,
    stack: Vec<Frame>,
    nodes: Vec<Node>,
    blocks: HashMap<String, Vec<Node>>,
    parent: Option<String>,
    // Anything besides whitespace and comments seen yet; `extends` must come first.
    seen_content: bool,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            lexer: Tokenizer::new(input),
            stack: Vec::new(),
            nodes: Vec::new(),
            blocks: HashMap::new(),
            parent: None,
            seen_content: false,
        }
    }

    pub fn parse(mut self) -> Result<Template> {
        let mut token_count = 0usize;
        while let Some(token) = self.lexer.next_token() {
            let token = token?;
            token_count += 1;
            match token.kind {
                TokenKind::Comment => {}
                TokenKind::Literal => self.literal(token)?,
                TokenKind::Variable => {
                    let expr = parse_var_expr(&token.text, token.line)?;
                    self.open_content(&token)?;
                    self.current_body().push(Node::Var(expr));
                }
                TokenKind::Tag => self.tag(&token)?,
            }
        }

        if let Some(frame) = self.stack.last() {
            return Err(Error::parse(
                frame.line(),
                format!("Unmatched action tag: '{}'", frame.keyword()),
            ));
        }

        debug!(
            tokens = token_count,
            nodes = self.nodes.len(),
            blocks = self.blocks.len(),
            parent = ?self.parent,
            "parsed template"
        );
        Ok(Template {
            name: None,
            nodes: self.nodes,
            parent: self.parent,
            blocks: self.blocks,
        })
    }

    fn current_body(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => frame.body_mut(),
            None => &mut self.nodes,
        }
    }

    fn literal(&mut self, token: Token) -> Result<()> {
        let blank = token.text.trim().is_empty();
        if self.stack.is_empty() && self.parent.is_some() {
            if blank {
                return Ok(());
            }
            return Err(self.outside_blocks(&token));
        }
        if !blank {
            self.seen_content = true;
        }
        self.current_body().push(Node::Text(token.text));
        Ok(())
    }

    /// Marks renderable content, rejecting it at the top level of a
    /// template that extends another.
    fn open_content(&mut self, token: &Token) -> Result<()> {
        if self.stack.is_empty() && self.parent.is_some() {
            return Err(self.outside_blocks(token));
        }
        self.seen_content = true;
        Ok(())
    }

    fn outside_blocks(&self, token: &Token) -> Error {
        let shown = match token.kind {
            TokenKind::Tag => tag_text(token),
            TokenKind::Variable => format!("{{{{ {} }}}}", token.text),
            _ => token.text.trim().to_string(),
        };
        Error::parse(
            token.line,
            format!(
                "Content outside of blocks in a template that extends '{}': '{}'",
                self.parent.as_deref().unwrap_or_default(),
                shown
            ),
        )
    }

    fn tag(&mut self, token: &Token) -> Result<()> {
        let line = token.line;
        let (keyword, rest) = match token.text.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (token.text.as_str(), ""),
        };
        let misunderstood =
            |what: &str| Error::parse(line, format!("Don't understand {what}: '{}'", tag_text(token)));

        match keyword {
            "" => Err(misunderstood("tag")),
            "if" => {
                let condition = expression_arg(rest, line).ok_or_else(|| misunderstood("if"))??;
                self.open_content(token)?;
                self.stack.push(Frame::If {
                    first: (condition, Vec::new()),
                    elifs: Vec::new(),
                    else_body: None,
                    line,
                });
                Ok(())
            }
            "elif" => {
                let condition = expression_arg(rest, line).ok_or_else(|| misunderstood("elif"))??;
                match self.stack.last_mut() {
                    None => Err(Error::parse(line, "Unmatched action tag: 'elif'")),
                    Some(Frame::If {
                        else_body: Some(_), ..
                    }) => Err(Error::parse(
                        line,
                        format!("elif after else: '{}'", tag_text(token)),
                    )),
                    Some(Frame::If { elifs, .. }) => {
                        elifs.push((condition, Vec::new()));
                        Ok(())
                    }
                    Some(other) => Err(Error::parse(
                        line,
                        format!("Mismatched elif tag: '{}'", other.keyword()),
                    )),
                }
            }
            "else" => {
                if !rest.is_empty() {
                    return Err(misunderstood("else"));
                }
                match self.stack.last_mut() {
                    None => Err(Error::parse(line, "Unmatched action tag: 'else'")),
                    Some(Frame::If {
                        else_body: Some(_), ..
                    }) => Err(Error::parse(
                        line,
                        format!("Too many else tags: '{}'", tag_text(token)),
                    )),
                    Some(Frame::If { else_body, .. }) => {
                        *else_body = Some(Vec::new());
                        Ok(())
                    }
                    Some(other) => Err(Error::parse(
                        line,
                        format!("Mismatched else tag: '{}'", other.keyword()),
                    )),
                }
            }
            "for" => {
                let words: Vec<&str> = rest.split_whitespace().collect();
                if words.len() < 3 || words[1] != "in" {
                    return Err(misunderstood("for"));
                }
                let target = valid_name(words[0], line)?;
                let iterable = expression_arg(&words[2..].join(" "), line)
                    .ok_or_else(|| misunderstood("for"))??;
                self.open_content(token)?;
                self.stack.push(Frame::For {
                    target,
                    iterable,
                    body: Vec::new(),
                    line,
                });
                Ok(())
            }
            "block" => {
                if rest.is_empty() || rest.contains(char::is_whitespace) {
                    return Err(misunderstood("block"));
                }
                let name = valid_name(rest, line)?;
                let open_twice = self
                    .stack
                    .iter()
                    .any(|f| matches!(f, Frame::Block { name: n, .. } if *n == name));
                if open_twice || self.blocks.contains_key(&name) {
                    return Err(Error::parse(line, format!("Duplicate block name: '{name}'")));
                }
                self.seen_content = true;
                self.stack.push(Frame::Block {
                    name,
                    body: Vec::new(),
                    has_super: false,
                    line,
                });
                Ok(())
            }
            "super" => {
                if !rest.is_empty() {
                    return Err(misunderstood("super"));
                }
                let enclosing = self.stack.iter_mut().rev().find_map(|f| match f {
                    Frame::Block {
                        name, has_super, ..
                    } => Some((name, has_super)),
                    _ => None,
                });
                match enclosing {
                    None => Err(Error::parse(
                        line,
                        format!("super outside of a block: '{}'", tag_text(token)),
                    )),
                    Some((name, true)) => Err(Error::parse(
                        line,
                        format!("Multiple super tags in block '{name}'"),
                    )),
                    Some((_, has_super)) => {
                        *has_super = true;
                        self.current_body().push(Node::Super);
                        Ok(())
                    }
                }
            }
            "extends" => {
                if rest.is_empty() {
                    return Err(misunderstood("extends"));
                }
                if self.seen_content || self.parent.is_some() || !self.stack.is_empty() {
                    return Err(Error::parse(
                        line,
                        format!("'extends' must be the first tag: '{}'", tag_text(token)),
                    ));
                }
                let name = template_name(rest, line)?;
                // Only blank text can precede the tag.
                self.nodes.clear();
                self.nodes.push(Node::Extends(name.clone()));
                self.parent = Some(name);
                Ok(())
            }
            "include" => {
                if rest.is_empty() {
                    return Err(misunderstood("include"));
                }
                let name = template_name(rest, line)?;
                self.open_content(token)?;
                self.current_body().push(Node::Include(name));
                Ok(())
            }
            end if end.starts_with("end") => self.end_tag(token, &end[3..], rest),
            other => Err(Error::parse(line, format!("Don't understand tag: '{other}'"))),
        }
    }

    fn end_tag(&mut self, token: &Token, closes: &str, rest: &str) -> Result<()> {
        let line = token.line;
        // Only `endblock` may repeat its name.
        if closes.is_empty() || (!rest.is_empty() && closes != "block") {
            return Err(Error::parse(
                line,
                format!("Don't understand end: '{}'", tag_text(token)),
            ));
        }
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| Error::parse(line, format!("Too many ends: '{}'", tag_text(token))))?;
        if frame.keyword() != closes {
            return Err(Error::parse(line, format!("Mismatched end tag: '{closes}'")));
        }

        let node = match frame {
            Frame::If {
                first,
                elifs,
                else_body,
                ..
            } => Node::If {
                cases: std::iter::once(first).chain(elifs).collect(),
                else_body,
            },
            Frame::For {
                target,
                iterable,
                body,
                ..
            } => Node::For {
                target,
                iterable,
                body,
            },
            Frame::Block { name, body, .. } => {
                if !rest.is_empty() && rest != name {
                    return Err(Error::parse(
                        line,
                        format!("Mismatched endblock name: '{rest}' closes block '{name}'"),
                    ));
                }
                if self.blocks.insert(name.clone(), body.clone()).is_some() {
                    return Err(Error::parse(line, format!("Duplicate block name: '{name}'")));
                }
                Node::Block { name, body }
            }
        };
        self.current_body().push(node);
        Ok(())
    }
}

fn tag_text(token: &Token) -> String {
    format!("{{% {} %}}", token.text)
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn valid_name(s: &str, line: usize) -> Result<String> {
    if is_name(s) {
        Ok(s.to_string())
    } else {
        Err(Error::parse(line, format!("Not a valid name: '{s}'")))
    }
}

/// `None` when the argument is not a single expression (missing, or several
/// whitespace-separated words); otherwise the parse result.
fn expression_arg(arg: &str, line: usize) -> Option<Result<VarExpr>> {
    if arg.is_empty() || arg.split('|').any(|p| p.trim().contains(char::is_whitespace)) {
        return None;
    }
    Some(parse_var_expr(arg, line))
}

/// Parses `path.to.value|filter|filter` as found inside `{{ }}`.
pub(crate) fn parse_var_expr(text: &str, line: usize) -> Result<VarExpr> {
    let mut pieces = text.split('|').map(str::trim);
    let path_text = pieces.next().unwrap_or_default();
    let mut segments = path_text.split('.');
    let head_ok = segments.next().is_some_and(is_name);
    let tail_ok =
        segments.all(|seg| is_name(seg) || (!seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit())));
    if !head_ok || !tail_ok {
        return Err(Error::parse(line, format!("Not a valid name: '{path_text}'")));
    }

    let filters = pieces
        .map(|f| valid_name(f, line))
        .collect::<Result<Vec<_>>>()?;
    Ok(VarExpr {
        path: path_text.split('.').map(str::to_string).collect(),
        filters,
    })
}

/// `"base.html"`, `'base.html'` or a bare `base.html`.
fn template_name(arg: &str, line: usize) -> Result<String> {
    let quoted = ['"', '\'']
        .iter()
        .find(|q| arg.len() >= 2 && arg.starts_with(**q) && arg.ends_with(**q));
    let name = match quoted {
        Some(_) => &arg[1..arg.len() - 1],
        None => arg,
    };
    let bare_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'));
    if name.is_empty() || (quoted.is_none() && !bare_ok) {
        return Err(Error::parse(line, format!("Not a valid name: '{arg}'")));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Template> {
        Parser::new(src).parse()
    }

    fn var(path: &str) -> VarExpr {
        VarExpr {
            path: path.split('.').map(str::to_string).collect(),
            filters: vec![],
        }
    }

    fn parse_err(src: &str) -> String {
        match parse(src) {
            Err(Error::Parse { message, .. }) => message,
            other => panic!("expected parse error for {src:?}, got {other:?}"),
        }
    }

    #[test]
    fn variable_with_filters() {
        let t = parse("{{ user.name | lower|capitalize }}").unwrap();
        assert_eq!(
            t.nodes,
            vec![Node::Var(VarExpr {
                path: vec!["user".into(), "name".into()],
                filters: vec!["lower".into(), "capitalize".into()],
            })]
        );
    }

    #[test]
    fn if_elif_else_structure() {
        let t = parse("{% if a %}A{% elif b %}B{% else %}C{% endif %}").unwrap();
        assert_eq!(
            t.nodes,
            vec![Node::If {
                cases: vec![
                    (var("a"), vec![Node::Text("A".into())]),
                    (var("b"), vec![Node::Text("B".into())]),
                ],
                else_body: Some(vec![Node::Text("C".into())]),
            }]
        );
    }

    #[test]
    fn each_branch_collects_its_own_nodes() {
        let t = parse(
            "{% if a %}1{{ x }}{% elif b %}{% for i in xs %}{{ i }}{% endfor %}{% elif c %}{% else %}z{% endif %}",
        )
        .unwrap();
        assert_eq!(
            t.nodes,
            vec![Node::If {
                cases: vec![
                    (var("a"), vec![Node::Text("1".into()), Node::Var(var("x"))]),
                    (
                        var("b"),
                        vec![Node::For {
                            target: "i".into(),
                            iterable: var("xs"),
                            body: vec![Node::Var(var("i"))],
                        }]
                    ),
                    (var("c"), vec![]),
                ],
                else_body: Some(vec![Node::Text("z".into())]),
            }]
        );

        let t = parse("{% if a %}only{% endif %}").unwrap();
        assert_eq!(
            t.nodes,
            vec![Node::If {
                cases: vec![(var("a"), vec![Node::Text("only".into())])],
                else_body: None,
            }]
        );
    }

    #[test]
    fn nested_for_inside_block() {
        let t = parse("{% block list %}{% for n in nums|reverse %}{{ n }}{% endfor %}{% endblock %}")
            .unwrap();
        let body = vec![Node::For {
            target: "n".into(),
            iterable: VarExpr {
                path: vec!["nums".into()],
                filters: vec!["reverse".into()],
            },
            body: vec![Node::Var(var("n"))],
        }];
        assert_eq!(
            t.nodes,
            vec![Node::Block {
                name: "list".into(),
                body: body.clone()
            }]
        );
        assert_eq!(t.block("list"), Some(body.as_slice()));
    }

    #[test]
    fn extends_records_parent_and_blocks() {
        let t = parse("{# c #}\n{% extends \"base.html\" %}\n{% block title %}T{% endblock title %}\n")
            .unwrap();
        assert_eq!(t.parent(), Some("base.html"));
        assert_eq!(t.block("title"), Some(&[Node::Text("T".into())][..]));
        assert_eq!(t.nodes[0], Node::Extends("base.html".into()));
    }

    #[test]
    fn comments_produce_no_nodes() {
        let t = parse("a{# x #}b").unwrap();
        assert_eq!(t.nodes, vec![Node::Text("a".into()), Node::Text("b".into())]);
    }

    #[test]
    fn bad_names() {
        assert_eq!(parse_err("Wat: {{ var%&!@ }}"), "Not a valid name: 'var%&!@'");
        assert_eq!(parse_err("Wat: {{ foo|filter%&!@ }}"), "Not a valid name: 'filter%&!@'");
        assert_eq!(parse_err("Wat: {% for @ in x %}{% endfor %}"), "Not a valid name: '@'");
        assert_eq!(parse_err("Wat: {% block @ %}"), "Not a valid name: '@'");
        assert_eq!(parse_err("{% extends @ %}"), "Not a valid name: '@'");
        assert_eq!(parse_err("{% include @ %}"), "Not a valid name: '@'");
    }

    #[test]
    fn malformed_tags() {
        assert_eq!(parse_err("Huh: {% bogus %}!!{% endbogus %}??"), "Don't understand tag: 'bogus'");
        assert_eq!(parse_err("Buh? {% if %}hi!{% endif %}"), "Don't understand if: '{% if %}'");
        assert_eq!(
            parse_err("Buh? {% if this or that %}hi!{% endif %}"),
            "Don't understand if: '{% if this or that %}'"
        );
        assert_eq!(
            parse_err("{% if One %}One{% elif a b c %}abc{% endif %}"),
            "Don't understand elif: '{% elif a b c %}'"
        );
        assert_eq!(
            parse_err("{% if One %}One{% else a %}a"),
            "Don't understand else: '{% else a %}'"
        );
        assert_eq!(
            parse_err("Weird: {% for x from y %}loop{% endfor %}"),
            "Don't understand for: '{% for x from y %}'"
        );
        assert_eq!(
            parse_err("Weird: {% for x, y in z %}loop{% endfor %}"),
            "Don't understand for: '{% for x, y in z %}'"
        );
        assert_eq!(parse_err("{% include %}"), "Don't understand include: '{% include %}'");
        assert_eq!(parse_err("{% extends %}"), "Don't understand extends: '{% extends %}'");
    }

    #[test]
    fn bad_nesting() {
        assert_eq!(parse_err("{% if x %}X"), "Unmatched action tag: 'if'");
        assert_eq!(parse_err("{% if x %}X{% endfor %}"), "Mismatched end tag: 'for'");
        assert_eq!(
            parse_err("{% if x %}{% endif %}{% endif %}"),
            "Too many ends: '{% endif %}'"
        );
        assert_eq!(parse_err("{% elif x %}"), "Unmatched action tag: 'elif'");
        assert_eq!(parse_err("{% else %}"), "Unmatched action tag: 'else'");
        assert_eq!(parse_err("{% for x in y %}{% elif x %}"), "Mismatched elif tag: 'for'");
        assert_eq!(parse_err("{% for x in y %}{% else %}"), "Mismatched else tag: 'for'");
        assert_eq!(
            parse_err("{% if x %}{% else %}{% else %}{% endif %}"),
            "Too many else tags: '{% else %}'"
        );
        assert_eq!(
            parse_err("{% if x %}{% else %}{% elif y %}{% endif %}"),
            "elif after else: '{% elif y %}'"
        );
    }

    #[test]
    fn malformed_end() {
        assert_eq!(parse_err("{% if x %}X{% end if %}"), "Don't understand end: '{% end if %}'");
        assert_eq!(
            parse_err("{% if x %}X{% endif now %}"),
            "Don't understand end: '{% endif now %}'"
        );
        assert_eq!(
            parse_err("{% block a %}{% endblock b %}"),
            "Mismatched endblock name: 'b' closes block 'a'"
        );
    }

    #[test]
    fn duplicate_blocks_rejected() {
        assert_eq!(
            parse_err("{% block a %}{% endblock %}{% block a %}{% endblock %}"),
            "Duplicate block name: 'a'"
        );
        assert_eq!(
            parse_err("{% block a %}{% block a %}{% endblock %}{% endblock %}"),
            "Duplicate block name: 'a'"
        );
    }

    #[test]
    fn extends_must_lead_and_own_the_top_level() {
        assert_eq!(
            parse_err("Weird: {% extends x %}"),
            "'extends' must be the first tag: '{% extends x %}'"
        );
        assert_eq!(
            parse_err("{% extends a %}{% extends b %}"),
            "'extends' must be the first tag: '{% extends b %}'"
        );
        assert_eq!(
            parse_err("{% extends base %}stray"),
            "Content outside of blocks in a template that extends 'base': 'stray'"
        );
        assert_eq!(
            parse_err("{% extends base %}{{ x }}"),
            "Content outside of blocks in a template that extends 'base': '{{ x }}'"
        );
        assert_eq!(
            parse_err("{% extends base %}{% include other %}"),
            "Content outside of blocks in a template that extends 'base': '{% include other %}'"
        );
    }

    #[test]
    fn super_only_once_inside_a_block() {
        assert_eq!(parse_err("{% super %}"), "super outside of a block: '{% super %}'");
        assert_eq!(
            parse_err("{% block a %}{% super %}{% if x %}{% super %}{% endif %}{% endblock %}"),
            "Multiple super tags in block 'a'"
        );
        let t = parse("{% block a %}<{% if x %}{% super %}{% endif %}>{% endblock %}").unwrap();
        assert!(matches!(&t.block("a").unwrap()[1], Node::If { cases, .. } if cases[0].1 == vec![Node::Super]));
    }

    #[test]
    fn errors_report_lines() {
        match parse("one\ntwo\n{% if x %}") {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
