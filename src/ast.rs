//! The typed syntax tree consumed and produced by the evaluator (spec §6).
//!
//! This mirrors a widely-used ESTree-ish JS AST dialect closely enough that
//! a real parser front-end can serialize straight into it, and a real
//! pretty-printer can walk the residual tree straight out of it. Both of
//! those are external collaborators; this module only owns the shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

impl DeclKind {
    /// Only the function-scoped kind is accepted by the evaluator (spec §4.3,
    /// Non-goals in spec §1: block-scoped declarations are rejected).
    pub fn is_function_scoped(self) -> bool {
        matches!(self, DeclKind::Var)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Program { body: Vec<Node> },
    ExpressionStatement { expression: Box<Node> },
    BlockStatement { body: Vec<Node> },
    EmptyStatement,

    VariableDeclaration { kind: DeclKind, declarations: Vec<Node> },
    VariableDeclarator { id: Box<Node>, init: Option<Box<Node>> },

    Identifier { name: String },
    StringLiteral { value: String },
    NumericLiteral { value: f64 },
    BooleanLiteral { value: bool },
    NullLiteral,
    RegExpLiteral { pattern: String, flags: String },
    /// Decimal digits of an arbitrary-precision integer, no trailing `n`.
    BigIntLiteral { value: String },

    BinaryExpression { left: Box<Node>, operator: String, right: Box<Node> },
    LogicalExpression { left: Box<Node>, operator: String, right: Box<Node> },
    UnaryExpression { operator: String, argument: Box<Node>, prefix: bool },
    UpdateExpression { operator: String, argument: Box<Node>, prefix: bool },
    SequenceExpression { expressions: Vec<Node> },
    AssignmentExpression { operator: String, left: Box<Node>, right: Box<Node> },

    MemberExpression { object: Box<Node>, property: Box<Node>, computed: bool },
    OptionalMemberExpression { object: Box<Node>, property: Box<Node>, computed: bool },

    ConditionalExpression { test: Box<Node>, consequent: Box<Node>, alternate: Box<Node> },

    IfStatement { test: Box<Node>, consequent: Box<Node>, alternate: Option<Box<Node>> },
    WhileStatement { test: Box<Node>, body: Box<Node> },
    DoWhileStatement { test: Box<Node>, body: Box<Node> },
    ForStatement {
        init: Option<Box<Node>>,
        test: Option<Box<Node>>,
        update: Option<Box<Node>>,
        body: Box<Node>,
    },

    /// `None` elements are elisions (`[1, , 3]`).
    ArrayExpression { elements: Vec<Option<Node>> },

    FunctionDeclaration {
        id: Option<Box<Node>>,
        params: Vec<Node>,
        body: Box<Node>,
        generator: bool,
        is_async: bool,
        rest: bool,
    },
    FunctionExpression {
        id: Option<Box<Node>>,
        params: Vec<Node>,
        body: Box<Node>,
        generator: bool,
        is_async: bool,
        rest: bool,
    },

    CallExpression { callee: Box<Node>, arguments: Vec<Node> },
    ReturnStatement { argument: Option<Box<Node>> },

    TryStatement {
        block: Box<Node>,
        handler: Option<Box<Node>>,
        finalizer: Option<Box<Node>>,
    },
    CatchClause { param: Option<Box<Node>>, body: Box<Node> },

    LabeledStatement { label: String, body: Box<Node> },
    BreakStatement { label: Option<String> },
}

impl Node {
    pub fn identifier(name: impl Into<String>) -> Node {
        Node::Identifier { name: name.into() }
    }

    pub fn as_identifier_name(&self) -> Option<&str> {
        match self {
            Node::Identifier { name } => Some(name),
            _ => None,
        }
    }
}

/// True for strings that could appear as a non-computed member property
/// (`obj.foo`) — used both by the member-expression printer preference in
/// spec §4.3 and by [`equivalent`]'s computed/dot normalization.
pub fn is_valid_identifier_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Structural equality used for tainted-loop fixed-point detection (spec
/// §4.3, §8). Ignores source locations (the tree carries none) and treats a
/// computed member access by string-literal key as equivalent to the dotted
/// form when that key is also a valid identifier name (spec §9).
pub fn equivalent(a: &Node, b: &Node) -> bool {
    use Node::*;
    match (a, b) {
        (Program { body: b1 }, Program { body: b2 }) => equivalent_seq(b1, b2),
        (ExpressionStatement { expression: e1 }, ExpressionStatement { expression: e2 }) => {
            equivalent(e1, e2)
        }
        (BlockStatement { body: b1 }, BlockStatement { body: b2 }) => equivalent_seq(b1, b2),
        (EmptyStatement, EmptyStatement) => true,
        (
            VariableDeclaration { kind: k1, declarations: d1 },
            VariableDeclaration { kind: k2, declarations: d2 },
        ) => k1 == k2 && equivalent_seq(d1, d2),
        (VariableDeclarator { id: i1, init: n1 }, VariableDeclarator { id: i2, init: n2 }) => {
            equivalent(i1, i2) && equivalent_opt(n1.as_deref(), n2.as_deref())
        }
        (Identifier { name: n1 }, Identifier { name: n2 }) => n1 == n2,
        (StringLiteral { value: v1 }, StringLiteral { value: v2 }) => v1 == v2,
        (NumericLiteral { value: v1 }, NumericLiteral { value: v2 }) => {
            v1 == v2 || (v1.is_nan() && v2.is_nan())
        }
        (BooleanLiteral { value: v1 }, BooleanLiteral { value: v2 }) => v1 == v2,
        (NullLiteral, NullLiteral) => true,
        (RegExpLiteral { pattern: p1, flags: f1 }, RegExpLiteral { pattern: p2, flags: f2 }) => {
            p1 == p2 && f1 == f2
        }
        (BigIntLiteral { value: v1 }, BigIntLiteral { value: v2 }) => v1 == v2,
        (
            BinaryExpression { left: l1, operator: o1, right: r1 },
            BinaryExpression { left: l2, operator: o2, right: r2 },
        ) => o1 == o2 && equivalent(l1, l2) && equivalent(r1, r2),
        (
            LogicalExpression { left: l1, operator: o1, right: r1 },
            LogicalExpression { left: l2, operator: o2, right: r2 },
        ) => o1 == o2 && equivalent(l1, l2) && equivalent(r1, r2),
        (
            UnaryExpression { operator: o1, argument: a1, prefix: p1 },
            UnaryExpression { operator: o2, argument: a2, prefix: p2 },
        ) => o1 == o2 && p1 == p2 && equivalent(a1, a2),
        (
            UpdateExpression { operator: o1, argument: a1, prefix: p1 },
            UpdateExpression { operator: o2, argument: a2, prefix: p2 },
        ) => o1 == o2 && p1 == p2 && equivalent(a1, a2),
        (SequenceExpression { expressions: e1 }, SequenceExpression { expressions: e2 }) => {
            equivalent_seq(e1, e2)
        }
        (
            AssignmentExpression { operator: o1, left: l1, right: r1 },
            AssignmentExpression { operator: o2, left: l2, right: r2 },
        ) => o1 == o2 && equivalent(l1, l2) && equivalent(r1, r2),
        (
            MemberExpression { .. } | OptionalMemberExpression { .. },
            MemberExpression { .. } | OptionalMemberExpression { .. },
        ) => equivalent_member(a, b),
        (
            ConditionalExpression { test: t1, consequent: c1, alternate: a1 },
            ConditionalExpression { test: t2, consequent: c2, alternate: a2 },
        ) => equivalent(t1, t2) && equivalent(c1, c2) && equivalent(a1, a2),
        (
            IfStatement { test: t1, consequent: c1, alternate: a1 },
            IfStatement { test: t2, consequent: c2, alternate: a2 },
        ) => {
            equivalent(t1, t2)
                && equivalent(c1, c2)
                && equivalent_opt(a1.as_deref(), a2.as_deref())
        }
        (WhileStatement { test: t1, body: b1 }, WhileStatement { test: t2, body: b2 }) => {
            equivalent(t1, t2) && equivalent(b1, b2)
        }
        (DoWhileStatement { test: t1, body: b1 }, DoWhileStatement { test: t2, body: b2 }) => {
            equivalent(t1, t2) && equivalent(b1, b2)
        }
        (
            ForStatement { init: i1, test: t1, update: u1, body: b1 },
            ForStatement { init: i2, test: t2, update: u2, body: b2 },
        ) => {
            equivalent_opt(i1.as_deref(), i2.as_deref())
                && equivalent_opt(t1.as_deref(), t2.as_deref())
                && equivalent_opt(u1.as_deref(), u2.as_deref())
                && equivalent(b1, b2)
        }
        (ArrayExpression { elements: e1 }, ArrayExpression { elements: e2 }) => {
            e1.len() == e2.len()
                && e1.iter().zip(e2.iter()).all(|(x, y)| match (x, y) {
                    (Some(x), Some(y)) => equivalent(x, y),
                    (None, None) => true,
                    _ => false,
                })
        }
        (
            FunctionDeclaration { id: i1, params: p1, body: b1, generator: g1, is_async: a1, rest: r1 },
            FunctionDeclaration { id: i2, params: p2, body: b2, generator: g2, is_async: a2, rest: r2 },
        )
        | (
            FunctionExpression { id: i1, params: p1, body: b1, generator: g1, is_async: a1, rest: r1 },
            FunctionExpression { id: i2, params: p2, body: b2, generator: g2, is_async: a2, rest: r2 },
        ) => {
            g1 == g2
                && a1 == a2
                && r1 == r2
                && equivalent_opt(i1.as_deref(), i2.as_deref())
                && equivalent_seq(p1, p2)
                && equivalent(b1, b2)
        }
        (CallExpression { callee: c1, arguments: a1 }, CallExpression { callee: c2, arguments: a2 }) => {
            equivalent(c1, c2) && equivalent_seq(a1, a2)
        }
        (ReturnStatement { argument: a1 }, ReturnStatement { argument: a2 }) => {
            equivalent_opt(a1.as_deref(), a2.as_deref())
        }
        (
            TryStatement { block: b1, handler: h1, finalizer: f1 },
            TryStatement { block: b2, handler: h2, finalizer: f2 },
        ) => {
            equivalent(b1, b2)
                && equivalent_opt(h1.as_deref(), h2.as_deref())
                && equivalent_opt(f1.as_deref(), f2.as_deref())
        }
        (CatchClause { param: p1, body: b1 }, CatchClause { param: p2, body: b2 }) => {
            equivalent_opt(p1.as_deref(), p2.as_deref()) && equivalent(b1, b2)
        }
        (LabeledStatement { label: l1, body: b1 }, LabeledStatement { label: l2, body: b2 }) => {
            l1 == l2 && equivalent(b1, b2)
        }
        (BreakStatement { label: l1 }, BreakStatement { label: l2 }) => l1 == l2,
        _ => false,
    }
}

fn equivalent_seq(a: &[Node], b: &[Node]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| equivalent(x, y))
}

fn equivalent_opt(a: Option<&Node>, b: Option<&Node>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => equivalent(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// `obj["prop"]` and `obj.prop` are the same member access when `"prop"` is
/// a valid identifier name; normalize both sides to a (object, key-string)
/// pair before comparing.
fn equivalent_member(a: &Node, b: &Node) -> bool {
    fn parts(n: &Node) -> Option<(&Node, Option<&str>, &Node, bool)> {
        match n {
            Node::MemberExpression { object, property, computed } => {
                Some((object, string_key(property, *computed), property, *computed))
            }
            Node::OptionalMemberExpression { object, property, computed } => {
                Some((object, string_key(property, *computed), property, *computed))
            }
            _ => None,
        }
    }
    fn string_key(property: &Node, computed: bool) -> Option<&str> {
        if computed {
            match property {
                Node::StringLiteral { value } if is_valid_identifier_name(value) => Some(value),
                _ => None,
            }
        } else {
            property.as_identifier_name()
        }
    }

    let (kind_a_optional, kind_b_optional) = (
        matches!(a, Node::OptionalMemberExpression { .. }),
        matches!(b, Node::OptionalMemberExpression { .. }),
    );
    if kind_a_optional != kind_b_optional {
        return false;
    }

    match (parts(a), parts(b)) {
        (Some((obj_a, Some(key_a), _, _)), Some((obj_b, Some(key_b), _, _))) => {
            equivalent(obj_a, obj_b) && key_a == key_b
        }
        (Some((obj_a, None, prop_a, comp_a)), Some((obj_b, None, prop_b, comp_b))) => {
            comp_a == comp_b && equivalent(obj_a, obj_b) && equivalent(prop_a, prop_b)
        }
        _ => false,
    }
}

/// Small builders used throughout the evaluator's tests to construct trees
/// by hand, standing in for the parser front-end this crate does not own.
#[cfg(test)]
pub mod builder {
    use super::*;

    pub fn ident(name: &str) -> Node {
        Node::identifier(name)
    }
    pub fn num(v: f64) -> Node {
        Node::NumericLiteral { value: v }
    }
    pub fn string(v: &str) -> Node {
        Node::StringLiteral { value: v.to_string() }
    }
    pub fn boolean(v: bool) -> Node {
        Node::BooleanLiteral { value: v }
    }
    pub fn null() -> Node {
        Node::NullLiteral
    }
    pub fn bin(left: Node, op: &str, right: Node) -> Node {
        Node::BinaryExpression { left: Box::new(left), operator: op.to_string(), right: Box::new(right) }
    }
    pub fn logical(left: Node, op: &str, right: Node) -> Node {
        Node::LogicalExpression { left: Box::new(left), operator: op.to_string(), right: Box::new(right) }
    }
    pub fn unary(op: &str, arg: Node, prefix: bool) -> Node {
        Node::UnaryExpression { operator: op.to_string(), argument: Box::new(arg), prefix }
    }
    pub fn update(op: &str, arg: Node, prefix: bool) -> Node {
        Node::UpdateExpression { operator: op.to_string(), argument: Box::new(arg), prefix }
    }
    pub fn assign(op: &str, left: Node, right: Node) -> Node {
        Node::AssignmentExpression { operator: op.to_string(), left: Box::new(left), right: Box::new(right) }
    }
    pub fn member(object: Node, property: Node, computed: bool) -> Node {
        Node::MemberExpression { object: Box::new(object), property: Box::new(property), computed }
    }
    pub fn expr_stmt(e: Node) -> Node {
        Node::ExpressionStatement { expression: Box::new(e) }
    }
    pub fn var_declarator(name: &str, init: Option<Node>) -> Node {
        Node::VariableDeclarator { id: Box::new(ident(name)), init: init.map(Box::new) }
    }
    pub fn var_decl(kind: DeclKind, decls: Vec<Node>) -> Node {
        Node::VariableDeclaration { kind, declarations: decls }
    }
    pub fn block(stmts: Vec<Node>) -> Node {
        Node::BlockStatement { body: stmts }
    }
    pub fn if_stmt(test: Node, consequent: Node, alternate: Option<Node>) -> Node {
        Node::IfStatement { test: Box::new(test), consequent: Box::new(consequent), alternate: alternate.map(Box::new) }
    }
    pub fn while_stmt(test: Node, body: Node) -> Node {
        Node::WhileStatement { test: Box::new(test), body: Box::new(body) }
    }
    pub fn array(elements: Vec<Option<Node>>) -> Node {
        Node::ArrayExpression { elements }
    }
    pub fn call(callee: Node, args: Vec<Node>) -> Node {
        Node::CallExpression { callee: Box::new(callee), arguments: args }
    }
    pub fn func_decl(name: &str, params: Vec<&str>, body: Node) -> Node {
        Node::FunctionDeclaration {
            id: Some(Box::new(ident(name))),
            params: params.into_iter().map(ident).collect(),
            body: Box::new(body),
            generator: false,
            is_async: false,
            rest: false,
        }
    }
    pub fn ret(arg: Option<Node>) -> Node {
        Node::ReturnStatement { argument: arg.map(Box::new) }
    }
    pub fn program(body: Vec<Node>) -> Node {
        Node::Program { body }
    }

    #[test]
    fn computed_string_key_equivalent_to_dotted_form() {
        let a = member(ident("a"), string("foo"), true);
        let b = member(ident("a"), ident("foo"), false);
        assert!(equivalent(&a, &b));
    }

    #[test]
    fn different_identifiers_not_equivalent() {
        assert!(!equivalent(&ident("a"), &ident("b")));
    }

    #[test]
    fn optional_vs_non_optional_member_not_equivalent() {
        let a = member(ident("a"), ident("foo"), false);
        let b = Node::OptionalMemberExpression {
            object: Box::new(ident("a")),
            property: Box::new(ident("foo")),
            computed: false,
        };
        assert!(!equivalent(&a, &b));
    }
}
