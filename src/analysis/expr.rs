//! Hash-consed symbolic terms.
//!
//! Every constructor normalizes its arguments and then interns the resulting
//! node in a process-wide table, so two structurally equal terms are always the
//! same allocation. Equality and hashing of [`Expr`] are therefore pointer
//! operations, which keeps the solver's state sets cheap.
//!
//! Shapes:
//!
//! | node     | meaning                                         |
//! |----------|-------------------------------------------------|
//! | `Int`    | known integer                                   |
//! | `Bool`   | known boolean                                   |
//! | `Seq`    | known finite sequence (the control stack)       |
//! | `Atom`   | named unknown, optionally tagged with a block   |
//! | `Neg`    | negation of a non-constant term                 |
//! | `Add`    | flattened n-ary sum, constant last              |
//! | `Head`   | first element of a symbolic sequence            |
//! | `Tail`   | remainder of a symbolic sequence                |
//! | `Cons`   | known heads prepended to a symbolic sequence    |
//! | `Select` | `cond ? a : b` with a symbolic condition        |

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use hashbrown::HashMap;

use crate::analysis::{BlockId, State};

// =============================================================================
// Nodes
// =============================================================================

/// The state component an atom stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Operand-stack depth (`S`).
    Stack,
    /// Control stack (`F`).
    Frames,
    /// Exception-pending flag (`E`).
    Exception,
}

impl Role {
    pub fn symbol(self) -> &'static str {
        match self {
            Role::Stack => "S",
            Role::Frames => "F",
            Role::Exception => "E",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Int(i64),
    Bool(bool),
    Seq(Vec<Expr>),
    Atom { role: Role, block: Option<BlockId> },
    Neg(Expr),
    Add(Vec<Expr>),
    Head(Expr),
    Tail(Expr),
    /// Heads followed by a symbolic tail; never ends in a `Cons` or `Seq`.
    Cons(Vec<Expr>),
    Select(Expr, Expr, Expr),
}

impl Node {
    fn free_vars(&self) -> FreeVars {
        match self {
            Node::Int(_) | Node::Bool(_) => FreeVars::BOUND,
            Node::Atom { block, .. } => block.map_or(FreeVars::BOUND, FreeVars::single),
            Node::Neg(term) | Node::Head(term) | Node::Tail(term) => term.free().clone(),
            Node::Seq(terms) | Node::Add(terms) | Node::Cons(terms) => {
                FreeVars::union(terms.iter().map(Expr::free))
            }
            Node::Select(cond, a, b) => FreeVars::union([cond.free(), a.free(), b.free()]),
        }
    }
}

// =============================================================================
// Free variables
// =============================================================================

/// Blocks whose state a term still depends on.
///
/// `BOUND` (no set at all) is kept distinct from any set so that a fully
/// determined term never allocates and can be recognized without inspecting
/// its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeVars(Option<Arc<BTreeSet<BlockId>>>);

impl FreeVars {
    pub const BOUND: FreeVars = FreeVars(None);

    fn single(block: BlockId) -> Self {
        FreeVars(Some(Arc::new(BTreeSet::from([block]))))
    }

    pub fn is_bound(&self) -> bool {
        self.0.is_none()
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.0.as_ref().is_some_and(|set| set.contains(&block))
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |set| set.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.0.iter().flat_map(|set| set.iter().copied())
    }

    fn union<'a>(parts: impl IntoIterator<Item = &'a FreeVars>) -> FreeVars {
        let mut result: Option<Arc<BTreeSet<BlockId>>> = None;
        for part in parts {
            let Some(set) = &part.0 else { continue };
            match &mut result {
                None => result = Some(Arc::clone(set)),
                Some(acc) => {
                    if !acc.is_superset(set) {
                        Arc::make_mut(acc).extend(set.iter().copied());
                    }
                }
            }
        }
        FreeVars(result)
    }
}

// =============================================================================
// Interned handle
// =============================================================================

struct Term {
    node: Node,
    free: FreeVars,
}

/// Handle to an interned term. Cloning is a reference-count bump.
#[derive(Clone)]
pub struct Expr(Arc<Term>);

impl Expr {
    pub fn node(&self) -> &Node {
        &self.0.node
    }

    pub fn free(&self) -> &FreeVars {
        &self.0.free
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.node() {
            Node::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.node() {
            Node::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.ptr_eq(other) {
            std::cmp::Ordering::Equal
        } else {
            self.node().cmp(other.node())
        }
    }
}

type Interner = Mutex<HashMap<Node, Expr>>;

fn interner() -> &'static Interner {
    static INTERNER: OnceLock<Interner> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(HashMap::new()))
}

fn intern(node: Node) -> Expr {
    let mut table = interner().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(expr) = table.get(&node) {
        return expr.clone();
    }
    let free = node.free_vars();
    let expr = Expr(Arc::new(Term {
        node: node.clone(),
        free,
    }));
    table.insert(node, expr.clone());
    expr
}

// =============================================================================
// Constructors
// =============================================================================

pub fn int(value: i64) -> Expr {
    intern(Node::Int(value))
}

pub fn boolean(value: bool) -> Expr {
    intern(Node::Bool(value))
}

pub fn seq(items: Vec<Expr>) -> Expr {
    intern(Node::Seq(items))
}

pub fn empty_seq() -> Expr {
    seq(Vec::new())
}

pub fn atom(role: Role, block: Option<BlockId>) -> Expr {
    intern(Node::Atom { role, block })
}

fn tally(counts: &mut Vec<(Expr, i64)>, term: &Expr, by: i64) {
    match counts.iter_mut().find(|(seen, _)| seen == term) {
        Some((_, count)) => *count += by,
        None => counts.push((term.clone(), by)),
    }
}

fn collect_term(term: &Expr, constant: &mut i64, counts: &mut Vec<(Expr, i64)>) {
    match term.node() {
        Node::Int(value) => *constant = constant.wrapping_add(*value),
        Node::Neg(inner) => tally(counts, inner, -1),
        _ => tally(counts, term, 1),
    }
}

/// Sum of `terms`: flattened, constants folded into one trailing integer,
/// opposite terms cancelled.
pub fn add(terms: &[Expr]) -> Expr {
    let mut constant: i64 = 0;
    let mut counts: Vec<(Expr, i64)> = Vec::new();

    for term in terms {
        match term.node() {
            Node::Add(parts) => {
                for part in parts {
                    collect_term(part, &mut constant, &mut counts);
                }
            }
            _ => collect_term(term, &mut constant, &mut counts),
        }
    }

    let mut out: Vec<Expr> = Vec::new();
    for (term, count) in counts {
        if count == 0 {
            continue;
        }
        let (term, count) = if count < 0 {
            (negate(&term), -count)
        } else {
            (term, count)
        };
        out.extend(std::iter::repeat_n(term, count as usize));
    }
    out.sort();

    if constant != 0 {
        out.push(int(constant));
    }

    match out.len() {
        0 => int(0),
        1 => out.remove(0),
        _ => intern(Node::Add(out)),
    }
}

pub fn negate(term: &Expr) -> Expr {
    match term.node() {
        Node::Int(value) => int(value.wrapping_neg()),
        Node::Neg(inner) => inner.clone(),
        Node::Add(parts) => add(&parts.iter().map(negate).collect::<Vec<_>>()),
        _ => intern(Node::Neg(term.clone())),
    }
}

pub fn head(term: &Expr) -> Expr {
    match term.node() {
        Node::Seq(items) if !items.is_empty() => items[0].clone(),
        Node::Cons(parts) => parts[0].clone(),
        _ => intern(Node::Head(term.clone())),
    }
}

pub fn tail(term: &Expr) -> Expr {
    match term.node() {
        Node::Seq(items) if !items.is_empty() => seq(items[1..].to_vec()),
        Node::Cons(parts) => cons(&parts[1..]),
        _ => intern(Node::Tail(term.clone())),
    }
}

/// Prepends every term but the last onto the last one.
///
/// Consing onto a known sequence yields a longer known sequence, and consing
/// onto a `Cons` extends it, so no nesting ever appears.
pub fn cons(terms: &[Expr]) -> Expr {
    let Some((last, heads)) = terms.split_last() else {
        return empty_seq();
    };
    if heads.is_empty() {
        return last.clone();
    }
    match last.node() {
        Node::Cons(rest) => {
            let mut all = heads.to_vec();
            all.extend(rest.iter().cloned());
            intern(Node::Cons(all))
        }
        Node::Seq(items) => {
            let mut all = heads.to_vec();
            all.extend(items.iter().cloned());
            seq(all)
        }
        _ => intern(Node::Cons(terms.to_vec())),
    }
}

pub fn select(cond: &Expr, a: &Expr, b: &Expr) -> Expr {
    match cond.node() {
        Node::Bool(true) => a.clone(),
        Node::Bool(false) => b.clone(),
        _ => intern(Node::Select(cond.clone(), a.clone(), b.clone())),
    }
}

pub fn free_vars(terms: &[Expr]) -> FreeVars {
    FreeVars::union(terms.iter().map(Expr::free))
}

// =============================================================================
// Substitution
// =============================================================================

/// Replaces atoms tagged with one block by concrete values.
#[derive(Debug, Clone)]
pub struct Replacement {
    block: BlockId,
    stack: Option<Expr>,
    frames: Option<Expr>,
    exception: Option<Expr>,
}

impl Replacement {
    pub fn new(block: BlockId) -> Self {
        Replacement {
            block,
            stack: None,
            frames: None,
            exception: None,
        }
    }

    /// Binds all three roles of `block` to the components of `state`.
    pub fn bind(block: BlockId, state: &State) -> Self {
        Replacement::new(block)
            .with(Role::Stack, state.stack.clone())
            .with(Role::Frames, state.frames.clone())
            .with(Role::Exception, state.exception.clone())
    }

    pub fn with(mut self, role: Role, value: Expr) -> Self {
        match role {
            Role::Stack => self.stack = Some(value),
            Role::Frames => self.frames = Some(value),
            Role::Exception => self.exception = Some(value),
        }
        self
    }

    fn binding(&self, role: Role) -> Option<&Expr> {
        match role {
            Role::Stack => self.stack.as_ref(),
            Role::Frames => self.frames.as_ref(),
            Role::Exception => self.exception.as_ref(),
        }
    }

    fn apply_all(&self, terms: &[Expr]) -> Vec<Expr> {
        terms.iter().map(|term| self.apply(term)).collect()
    }

    /// Rebuilds `term` through the normalizing constructors with this
    /// replacement applied to every matching atom.
    pub fn apply(&self, term: &Expr) -> Expr {
        if !term.free().contains(self.block) {
            return term.clone();
        }
        match term.node() {
            Node::Int(_) | Node::Bool(_) => term.clone(),
            Node::Atom { role, block } => {
                if *block == Some(self.block) {
                    self.binding(*role).cloned().unwrap_or_else(|| term.clone())
                } else {
                    term.clone()
                }
            }
            Node::Seq(items) => seq(self.apply_all(items)),
            Node::Neg(inner) => negate(&self.apply(inner)),
            Node::Add(parts) => add(&self.apply_all(parts)),
            Node::Head(inner) => head(&self.apply(inner)),
            Node::Tail(inner) => tail(&self.apply(inner)),
            Node::Cons(parts) => cons(&self.apply_all(parts)),
            Node::Select(cond, a, b) => select(&self.apply(cond), &self.apply(a), &self.apply(b)),
        }
    }
}

// =============================================================================
// Operators and display
// =============================================================================

impl ops::Add<i64> for &Expr {
    type Output = Expr;

    fn add(self, rhs: i64) -> Expr {
        crate::analysis::expr::add(&[self.clone(), int(rhs)])
    }
}

impl ops::Add<&Expr> for &Expr {
    type Output = Expr;

    fn add(self, rhs: &Expr) -> Expr {
        crate::analysis::expr::add(&[self.clone(), rhs.clone()])
    }
}

impl ops::Sub<i64> for &Expr {
    type Output = Expr;

    fn sub(self, rhs: i64) -> Expr {
        crate::analysis::expr::add(&[self.clone(), int(rhs.wrapping_neg())])
    }
}

impl ops::Neg for &Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        negate(self)
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[&Expr]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", arg)?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Int(value) => write!(f, "{}", value),
            Node::Bool(value) => write!(f, "{}", value),
            Node::Seq(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Node::Atom { role, block: None } => write!(f, "{}", role.symbol()),
            Node::Atom {
                role,
                block: Some(block),
            } => write!(f, "{}.{}", role.symbol(), block),
            Node::Neg(inner) => write!(f, "-{}", inner),
            Node::Add(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    let text = part.to_string();
                    if i > 0 && !text.starts_with('-') {
                        write!(f, "+")?;
                    }
                    write!(f, "{}", text)?;
                }
                Ok(())
            }
            Node::Head(inner) => write_call(f, "head", &[inner]),
            Node::Tail(inner) => write_call(f, "tail", &[inner]),
            Node::Cons(parts) => write_call(f, "cons", &parts.iter().collect::<Vec<_>>()),
            Node::Select(cond, a, b) => write_call(f, "select", &[cond, a, b]),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
