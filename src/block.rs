//! The per-file tree of conditional blocks and its formula builders.
//!
//! A [`CppFile`] owns its blocks in an index arena: blocks refer to their
//! parent, their preceding sibling in the same `#if` chain and the macros
//! they use by id or name, never by pointer, so the back-references of the
//! block DAG need no shared ownership. `B00` is the synthetic root standing
//! for the whole file; real blocks are numbered `B0`, `B1`, ... in the
//! order their directives appear.
//!
//! After the directive stream has been consumed, [`CppFile::late_construct`]
//! rewrites every block expression into the propositional fragment:
//! `defined(X)` turns into `X`, tracked macros into their replacement
//! symbols, standalone integer literals into `CONFIG_CVALUE_*` names, and
//! arithmetic or comparison subexpressions into fresh `__FREE__*` symbols.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::joiner::{StringJoiner, UniqueStringJoiner};
use crate::symbol;

pub type BlockId = usize;

/// Arena index of the synthetic root block.
pub const ROOT_ID: BlockId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    ElseIf,
    Else,
    Dummy,
}

/// Source position of a directive, 1-based line and column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug)]
pub struct ConditionalBlock {
    name: String,
    kind: BlockKind,
    raw_expression: String,
    expression: String,
    start: Location,
    end: Location,
    parent: Option<BlockId>,
    prev: Option<BlockId>,
    children: Vec<BlockId>,
    macros_used: Vec<String>,
}

impl ConditionalBlock {
    /// Unique name, also the propositional variable of the block.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn is_dummy(&self) -> bool {
        self.kind == BlockKind::Dummy
    }

    pub fn is_else(&self) -> bool {
        self.kind == BlockKind::Else
    }

    /// The expression as it appeared in the directive.
    pub fn raw_expression(&self) -> &str {
        &self.raw_expression
    }

    /// The rewritten expression, available after `late_construct`.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn start(&self) -> Location {
        self.start
    }

    pub fn end(&self) -> Location {
        self.end
    }

    /// Enclosing block; `None` only for the root.
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    /// Preceding sibling in the same `#if`/`#elif`/`#else` chain.
    pub fn prev(&self) -> Option<BlockId> {
        self.prev
    }

    pub fn children(&self) -> &[BlockId] {
        &self.children
    }
}

/// A tracked object-like macro and the guards of its definition sites.
#[derive(Debug)]
pub struct CppDefine {
    name: String,
    replacement: String,
    defined_in: Vec<BlockId>,
    undef_in: Vec<BlockId>,
    define_guards: Vec<String>,
    undef_guards: Vec<String>,
    macro_deps: Vec<String>,
}

impl CppDefine {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbol substituted for the macro in rewritten expressions.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn sites(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.defined_in.iter().chain(self.undef_in.iter()).copied()
    }

    /// The formula tying the replacement symbol to the guards under which
    /// the macro is defined.
    pub fn constraint(&self) -> String {
        if self.define_guards.is_empty() {
            return format!("( ! ( {} ) )", self.replacement);
        }
        let defined = self.define_guards.join(" || ");
        if self.undef_guards.is_empty() {
            format!("( {} <-> ( {} ) )", self.replacement, defined)
        } else {
            let undefined = self.undef_guards.join(" || ");
            format!("( {} <-> ( ( {} ) && ! ( {} ) ) )", self.replacement, defined, undefined)
        }
    }
}

/// Source of the predicate under which the build system selects a file.
///
/// The core treats build-description knowledge as external; this seam is
/// where it comes in. The default provider contributes the bare file
/// variable, leaving its meaning to the loaded models.
pub trait BuildConditionProvider: Send + Sync {
    fn file_condition(&self, file: &CppFile) -> Option<String>;

    fn arch_condition(&self, _arch: &str) -> Option<String> {
        None
    }
}

/// Presence of the file variable is the whole build condition.
#[derive(Debug, Default)]
pub struct FilePresenceProvider;

impl BuildConditionProvider for FilePresenceProvider {
    fn file_condition(&self, file: &CppFile) -> Option<String> {
        Some(file.file_var().to_string())
    }
}

/// A parsed source file: the block arena plus the macro define table.
#[derive(Debug)]
pub struct CppFile {
    filename: String,
    file_var: String,
    arch: String,
    blocks: Vec<ConditionalBlock>,
    defines: BTreeMap<String, CppDefine>,
    verbose_names: bool,
}

impl CppFile {
    pub fn new(filename: impl Into<String>, arch: impl Into<String>, verbose_names: bool) -> Self {
        let filename = filename.into();
        let file_var = symbol::file_var(&filename);
        let root = ConditionalBlock {
            name: "B00".to_string(),
            kind: BlockKind::If,
            raw_expression: String::new(),
            expression: String::new(),
            start: Location::new(1, 0),
            end: Location::default(),
            parent: None,
            prev: None,
            children: Vec::new(),
            macros_used: Vec::new(),
        };
        Self {
            filename,
            file_var,
            arch: arch.into(),
            blocks: vec![root],
            defines: BTreeMap::new(),
            verbose_names,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn file_var(&self) -> &str {
        &self.file_var
    }

    /// Architecture tag for architecture-specific files, empty otherwise.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn root(&self) -> BlockId {
        ROOT_ID
    }

    pub fn block(&self, id: BlockId) -> &ConditionalBlock {
        &self.blocks[id]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All blocks in insertion order, the root included.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &ConditionalBlock)> {
        self.blocks.iter().enumerate()
    }

    pub fn defines(&self) -> impl Iterator<Item = &CppDefine> {
        self.defines.values()
    }

    pub fn define(&self, name: &str) -> Option<&CppDefine> {
        self.defines.get(name)
    }

    /// Predicate telling the intersect whether a symbol is *not* shadowed
    /// by an in-file macro and may be looked up in the model.
    pub fn define_checker(&self) -> impl Fn(&str) -> bool + '_ {
        |item: &str| {
            let base = item.split('.').next().unwrap_or(item);
            !self.defines.contains_key(base)
        }
    }

    /// Append a real block. `parent` is the enclosing block (`ROOT_ID` for
    /// top level), `prev` the preceding sibling for `#elif`/`#else`.
    pub fn add_block(
        &mut self,
        kind: BlockKind,
        raw_expression: impl Into<String>,
        parent: BlockId,
        prev: Option<BlockId>,
        start: Location,
    ) -> BlockId {
        let id = self.blocks.len();
        let number = id - 1;
        let name = if self.verbose_names {
            format!("B{}_{}", number, block_name_suffix(&self.filename))
        } else {
            format!("B{number}")
        };
        self.blocks.push(ConditionalBlock {
            name,
            kind,
            raw_expression: raw_expression.into(),
            expression: String::new(),
            start,
            end: start,
            parent: Some(parent),
            prev,
            children: Vec::new(),
            macros_used: Vec::new(),
        });
        self.blocks[parent].children.push(id);
        id
    }

    pub fn set_block_end(&mut self, id: BlockId, end: Location) {
        self.blocks[id].end = end;
    }

    /// Record a `#define` (or `#undef`) of `name` inside `block`.
    ///
    /// `body` is the single-identifier replacement text when the directive
    /// has one; it refines the guard of this definition site.
    pub fn add_define(
        &mut self,
        name: &str,
        body: Option<&str>,
        block: BlockId,
        is_define: bool,
    ) {
        let guard_block = if block == ROOT_ID {
            "B00".to_string()
        } else {
            self.blocks[block].name.clone()
        };
        let mut dep = None;
        let guard = match body {
            Some(ident) if is_define => {
                let replacement = match self.defines.get(ident) {
                    Some(define) => {
                        dep = Some(ident.to_string());
                        define.replacement.clone()
                    }
                    None => ident.to_string(),
                };
                format!("( {guard_block} && {replacement} )")
            }
            _ => guard_block,
        };
        let define = self.defines.entry(name.to_string()).or_insert_with(|| CppDefine {
            name: name.to_string(),
            replacement: format!("{name}."),
            defined_in: Vec::new(),
            undef_in: Vec::new(),
            define_guards: Vec::new(),
            undef_guards: Vec::new(),
            macro_deps: Vec::new(),
        });
        if is_define {
            define.defined_in.push(block);
            define.define_guards.push(guard);
        } else {
            define.undef_in.push(block);
            define.undef_guards.push(guard);
        }
        if let Some(dep) = dep {
            if !define.macro_deps.contains(&dep) {
                define.macro_deps.push(dep);
            }
        }
    }

    /// Rewrite every block expression into the propositional fragment and
    /// cache the result. Must run once after the directive stream ends.
    pub fn late_construct(&mut self) {
        let mut free_counter = 0u32;
        let names: BTreeSet<String> = self.defines.keys().cloned().collect();
        for id in 1..self.blocks.len() {
            let raw = self.blocks[id].raw_expression.clone();
            if raw.is_empty() {
                continue;
            }
            let mut used = BTreeSet::new();
            let rewritten = rewrite_expression(&raw, &names, &mut used, &mut free_counter);
            let block = &mut self.blocks[id];
            block.expression = rewritten;
            block.macros_used = used
                .into_iter()
                .filter(|name| self.defines.contains_key(name))
                .collect();
        }
    }

    /// The code precondition of a block: its own constraint, the chain and
    /// ancestry constraints, and the guard formulas of every macro the
    /// involved expressions use.
    pub fn code_constraints(&self, id: BlockId) -> String {
        let mut sj = UniqueStringJoiner::new();
        let mut visited_blocks = HashSet::new();
        let mut visited_defines = HashSet::new();
        self.gather_constraints(id, &mut sj, &mut visited_blocks, &mut visited_defines);
        sj.join("\n&& ")
    }

    fn gather_constraints(
        &self,
        id: BlockId,
        sj: &mut UniqueStringJoiner,
        visited_blocks: &mut HashSet<BlockId>,
        visited_defines: &mut HashSet<String>,
    ) {
        if !visited_blocks.insert(id) {
            return;
        }
        let block = &self.blocks[id];
        sj.push(self.block_constraint(id));
        if let Some(parent) = block.parent {
            if parent != ROOT_ID {
                sj.push(format!("( {} -> {} )", block.name, self.blocks[parent].name));
            }
        }
        if let Some(prev) = block.prev {
            self.gather_constraints(prev, sj, visited_blocks, visited_defines);
        }
        if let Some(parent) = block.parent {
            self.gather_constraints(parent, sj, visited_blocks, visited_defines);
        }
        for name in &block.macros_used {
            self.gather_define_constraints(name, sj, visited_blocks, visited_defines);
        }
    }

    fn gather_define_constraints(
        &self,
        name: &str,
        sj: &mut UniqueStringJoiner,
        visited_blocks: &mut HashSet<BlockId>,
        visited_defines: &mut HashSet<String>,
    ) {
        if !visited_defines.insert(name.to_string()) {
            return;
        }
        let Some(define) = self.defines.get(name) else { return };
        sj.push(define.constraint());
        for site in define.sites() {
            self.gather_constraints(site, sj, visited_blocks, visited_defines);
        }
        for dep in &define.macro_deps {
            self.gather_define_constraints(dep, sj, visited_blocks, visited_defines);
        }
    }

    /// The constraint a single block contributes to any formula it appears
    /// in. The root contributes its name: the file as a whole is always
    /// selectable.
    fn block_constraint(&self, id: BlockId) -> String {
        let block = &self.blocks[id];
        if id == ROOT_ID {
            return block.name.clone();
        }
        match block.kind {
            BlockKind::If => {
                format!("( {} <-> ( {} ) )", block.name, block.expression)
            }
            BlockKind::ElseIf => {
                let mut terms = StringJoiner::new();
                terms.push(format!("( {} )", block.expression));
                self.push_negated_chain(block.prev, &mut terms);
                format!("( {} <-> ( {} ) )", block.name, terms.join(" && "))
            }
            BlockKind::Else => {
                let mut terms = StringJoiner::new();
                self.push_negated_chain(block.prev, &mut terms);
                format!("( {} <-> ( {} ) )", block.name, terms.join(" && "))
            }
            BlockKind::Dummy => format!("( {} <-> 1 )", block.name),
        }
    }

    fn push_negated_chain(&self, mut prev: Option<BlockId>, terms: &mut StringJoiner) {
        while let Some(id) = prev {
            terms.push(format!("! ( {} )", self.blocks[id].name));
            prev = self.blocks[id].prev;
        }
    }

    /// The build-system precondition of this file: the linkage between the
    /// root block and the file variable, the provider predicate, and the
    /// architecture predicate for tagged files.
    pub fn build_system_condition(&self, provider: &dyn BuildConditionProvider) -> String {
        let mut sj = StringJoiner::new();
        sj.push(format!("( {} <-> {} )", self.blocks[ROOT_ID].name, self.file_var));
        if let Some(condition) = provider.file_condition(self) {
            sj.push(condition);
        }
        if !self.arch.is_empty() {
            if let Some(condition) = provider.arch_condition(&self.arch) {
                sj.push(condition);
            }
        }
        sj.join(" && ")
    }

    /// Give every multi-branch decision an `#else` arm by appending dummy
    /// blocks; dummies carry no constraint and are skipped by the defect
    /// scan, but make coverage enumeration exhaustive.
    pub fn decision_coverage(&mut self) {
        let mut has_next: HashSet<BlockId> = HashSet::new();
        for block in &self.blocks {
            if let Some(prev) = block.prev {
                has_next.insert(prev);
            }
        }
        let chain_ends: Vec<BlockId> = self
            .blocks
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(id, block)| {
                !has_next.contains(id) && block.kind != BlockKind::Else && !block.is_dummy()
            })
            .map(|(id, _)| id)
            .collect();
        for end in chain_ends {
            let parent = self.blocks[end].parent.unwrap_or(ROOT_ID);
            let at = self.blocks[end].end;
            let dummy = self.add_block(BlockKind::Dummy, "", parent, Some(end), at);
            self.set_block_end(dummy, at);
        }
    }

    /// Innermost block whose source range contains the line; the root if
    /// no real block does.
    pub fn block_at_position(&self, line: u32) -> BlockId {
        let mut best = ROOT_ID;
        let mut best_span = u32::MAX;
        for (id, block) in self.blocks.iter().enumerate().skip(1) {
            if block.is_dummy() || block.start.line > line || block.end.line < line {
                continue;
            }
            let span = block.end.line - block.start.line;
            if span < best_span {
                best = id;
                best_span = span;
            }
        }
        best
    }
}

fn block_name_suffix(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ─── Expression rewriting ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum CTok {
    Ident(String),
    Number(String),
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Not,
    Op,
}

fn lex_cpp(expr: &str) -> Vec<CTok> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(CTok::Ident(word));
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(CTok::Number(number));
            }
            '(' => {
                chars.next();
                tokens.push(CTok::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(CTok::RParen);
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(CTok::AndAnd);
                } else {
                    tokens.push(CTok::Op);
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(CTok::OrOr);
                } else {
                    tokens.push(CTok::Op);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(CTok::Op);
                } else {
                    tokens.push(CTok::Not);
                }
            }
            '\'' => {
                // character literal, absorbed as a number-like token
                chars.next();
                let mut literal = String::new();
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    literal.push(c);
                }
                tokens.push(CTok::Number(literal));
            }
            _ => {
                chars.next();
                // a second char of two-char operators adds nothing
                if let Some(&next) = chars.peek() {
                    if matches!(c, '=' | '<' | '>') && matches!(next, '=' | '<' | '>') {
                        chars.next();
                    }
                }
                tokens.push(CTok::Op);
            }
        }
    }
    tokens
}

struct Rewriter<'a> {
    tokens: Vec<CTok>,
    pos: usize,
    defines: &'a BTreeSet<String>,
    used: &'a mut BTreeSet<String>,
    free_counter: &'a mut u32,
}

impl Rewriter<'_> {
    fn peek(&self) -> Option<&CTok> {
        self.tokens.get(self.pos)
    }

    fn fresh_free(&mut self) -> String {
        let name = format!("{}{}", symbol::FREE_PREFIX, *self.free_counter);
        *self.free_counter += 1;
        name
    }

    fn parse_or(&mut self) -> Option<String> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&CTok::OrOr) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Some(parts.join(" || "))
    }

    fn parse_and(&mut self) -> Option<String> {
        let mut parts = vec![self.parse_unary()?];
        while self.peek() == Some(&CTok::AndAnd) {
            self.pos += 1;
            parts.push(self.parse_unary()?);
        }
        Some(parts.join(" && "))
    }

    fn parse_unary(&mut self) -> Option<String> {
        if self.peek() == Some(&CTok::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Some(format!("! {inner}"));
        }
        self.parse_value()
    }

    /// One operand of the boolean structure. Whenever the operand turns out
    /// to be arithmetic (an operator token appears), the whole run up to
    /// the next boolean connective collapses into a fresh free symbol.
    fn parse_value(&mut self) -> Option<String> {
        let start = self.pos;
        if matches!(self.peek(), Some(CTok::Op)) {
            return Some(self.absorb_from(start));
        }
        let Some(primary) = self.parse_primary() else {
            return Some(self.absorb_from(start));
        };
        if matches!(self.peek(), Some(CTok::Op)) {
            return Some(self.absorb_from(start));
        }
        Some(primary)
    }

    fn parse_primary(&mut self) -> Option<String> {
        match self.peek()?.clone() {
            CTok::Ident(name) if name == "defined" => {
                self.pos += 1;
                match self.peek()?.clone() {
                    CTok::LParen => {
                        self.pos += 1;
                        let CTok::Ident(inner) = self.peek()?.clone() else { return None };
                        self.pos += 1;
                        if self.peek() != Some(&CTok::RParen) {
                            return None;
                        }
                        self.pos += 1;
                        Some(self.replace_ident(inner))
                    }
                    CTok::Ident(inner) => {
                        self.pos += 1;
                        Some(self.replace_ident(inner))
                    }
                    _ => None,
                }
            }
            CTok::Ident(name) => {
                self.pos += 1;
                if self.peek() == Some(&CTok::LParen) {
                    // function-like macro call, not expressible
                    return None;
                }
                Some(self.replace_ident(name))
            }
            CTok::Number(number) => {
                self.pos += 1;
                Some(format!("{}{}", symbol::CVALUE_PREFIX, sanitize(&number)))
            }
            CTok::LParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&CTok::RParen) {
                    return None;
                }
                self.pos += 1;
                Some(format!("( {inner} )"))
            }
            _ => None,
        }
    }

    fn replace_ident(&mut self, name: String) -> String {
        if self.defines.contains(&name) {
            self.used.insert(name.clone());
            format!("{name}.")
        } else {
            name
        }
    }

    /// Consume everything up to the next boolean connective or unbalanced
    /// closing parenthesis and stand a free symbol in for it.
    fn absorb_from(&mut self, start: usize) -> String {
        self.pos = start;
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                CTok::LParen => depth += 1,
                CTok::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                CTok::AndAnd | CTok::OrOr if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        self.fresh_free()
    }
}

fn sanitize(token: &str) -> String {
    token
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Rewrite a raw directive expression into the propositional fragment,
/// replacing tracked macros and recording which were used. A run that the
/// grammar cannot make sense of at all becomes a single free symbol.
fn rewrite_expression(
    raw: &str,
    defines: &BTreeSet<String>,
    used: &mut BTreeSet<String>,
    free_counter: &mut u32,
) -> String {
    let tokens = lex_cpp(raw);
    if tokens.is_empty() {
        return String::new();
    }
    let mut rewriter = Rewriter { tokens, pos: 0, defines, used, free_counter };
    match rewriter.parse_or() {
        Some(result) if rewriter.pos == rewriter.tokens.len() => result,
        _ => {
            log::debug!("expression not expressible, replacing: {raw}");
            rewriter.used.clear();
            rewriter.fresh_free()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(raw: &str) -> String {
        let defines = BTreeSet::new();
        let mut used = BTreeSet::new();
        let mut counter = 0;
        rewrite_expression(raw, &defines, &mut used, &mut counter)
    }

    #[test]
    fn defined_is_stripped() {
        assert_eq!(rewrite("defined(CONFIG_FOO)"), "CONFIG_FOO");
        assert_eq!(rewrite("defined CONFIG_FOO"), "CONFIG_FOO");
        assert_eq!(rewrite("!defined(CONFIG_FOO)"), "! CONFIG_FOO");
        assert_eq!(
            rewrite("defined(CONFIG_B) || defined(CONFIG_C)"),
            "CONFIG_B || CONFIG_C"
        );
    }

    #[test]
    fn numbers_become_cvalue_symbols() {
        assert_eq!(rewrite("0"), "CONFIG_CVALUE_0");
        assert_eq!(rewrite("0x10"), "CONFIG_CVALUE_0x10");
    }

    #[test]
    fn arithmetic_collapses_to_free_symbols() {
        assert_eq!(rewrite("CONFIG_X > 2"), "__FREE__0");
        assert_eq!(rewrite("CONFIG_X > 2 && CONFIG_Y"), "__FREE__0 && CONFIG_Y");
        assert_eq!(rewrite("( CONFIG_A + 1 ) * 3 || B"), "__FREE__1 || B");
        assert_eq!(rewrite("FOO(bar) && X"), "__FREE__0 && X");
    }

    #[test]
    fn boolean_structure_is_preserved() {
        assert_eq!(rewrite("( A || B ) && ! C"), "( A || B ) && ! C");
    }

    #[test]
    fn macro_names_are_replaced_and_recorded() {
        let defines: BTreeSet<String> = ["FOO".to_string()].into();
        let mut used = BTreeSet::new();
        let mut counter = 0;
        let out = rewrite_expression("defined(FOO) && CONFIG_X", &defines, &mut used, &mut counter);
        assert_eq!(out, "FOO. && CONFIG_X");
        assert!(used.contains("FOO"));
    }

    fn chain_file() -> CppFile {
        // #ifdef CONFIG_A          -> B0
        //   #if defined(CONFIG_A)  -> B1
        //   #elif defined(CONFIG_B) || defined(CONFIG_C)  -> B2
        //   #else                  -> B3
        //   #endif
        // #endif
        let mut file = CppFile::new("chain.c", "", false);
        let b0 = file.add_block(BlockKind::If, "defined(CONFIG_A)", ROOT_ID, None, Location::new(1, 1));
        let b1 = file.add_block(BlockKind::If, "defined(CONFIG_A)", b0, None, Location::new(2, 1));
        let b2 = file.add_block(
            BlockKind::ElseIf,
            "defined(CONFIG_B) || defined(CONFIG_C)",
            b0,
            Some(b1),
            Location::new(4, 1),
        );
        file.add_block(BlockKind::Else, "", b0, Some(b2), Location::new(6, 1));
        file.late_construct();
        file
    }

    #[test]
    fn block_names_follow_insertion_order() {
        let file = chain_file();
        let names: Vec<&str> = file.blocks().map(|(_, b)| b.name()).collect();
        assert_eq!(names, vec!["B00", "B0", "B1", "B2", "B3"]);
    }

    #[test]
    fn elif_constraint_parenthesizes_the_expression() {
        let file = chain_file();
        let constraints = file.code_constraints(3);
        assert!(constraints
            .contains("( B2 <-> ( ( CONFIG_B || CONFIG_C ) && ! ( B1 ) ) )"));
        // the inner chain hangs below B0, and the root is a bare conjunct
        assert!(constraints.contains("( B2 -> B0 )"));
        assert!(constraints.contains("( B0 <-> ( CONFIG_A ) )"));
        assert!(constraints.contains("B00"));
    }

    #[test]
    fn else_negates_the_whole_chain() {
        let file = chain_file();
        let constraints = file.code_constraints(4);
        assert!(constraints.contains("( B3 <-> ( ! ( B2 ) && ! ( B1 ) ) )"));
    }

    #[test]
    fn code_constraints_reference_only_related_symbols() {
        let file = chain_file();
        let constraints = file.code_constraints(2);
        for item in symbol::items_of_string(&constraints) {
            assert!(
                ["B00", "B0", "B1", "CONFIG_A"].contains(&item.as_str()),
                "unexpected symbol {item} in {constraints}"
            );
        }
    }

    #[test]
    fn define_guard_formulas() {
        // #define FOO CONFIG_X at the top level, #if FOO -> B0
        let mut file = CppFile::new("def.c", "", false);
        file.add_define("FOO", Some("CONFIG_X"), ROOT_ID, true);
        file.add_block(BlockKind::If, "FOO", ROOT_ID, None, Location::new(2, 1));
        file.late_construct();

        assert_eq!(file.block(1).expression(), "FOO.");
        let constraints = file.code_constraints(1);
        assert!(constraints.contains("( B0 <-> ( FOO. ) )"));
        assert!(constraints.contains("( FOO. <-> ( ( B00 && CONFIG_X ) ) )"));
    }

    #[test]
    fn undef_guards_negate() {
        let mut file = CppFile::new("undef.c", "", false);
        let b0 = file.add_block(BlockKind::If, "defined(CONFIG_Z)", ROOT_ID, None, Location::new(1, 1));
        file.add_define("FOO", None, ROOT_ID, true);
        file.add_define("FOO", None, b0, false);
        let define = file.define("FOO").unwrap();
        assert_eq!(define.constraint(), "( FOO. <-> ( ( B00 ) && ! ( B0 ) ) )");
    }

    #[test]
    fn define_checker_rejects_macro_symbols() {
        let mut file = CppFile::new("def.c", "", false);
        file.add_define("FOO", None, ROOT_ID, true);
        let checker = file.define_checker();
        assert!(!checker("FOO"));
        assert!(!checker("FOO."));
        assert!(checker("CONFIG_BAR"));
    }

    #[test]
    fn decision_coverage_appends_dummy_else() {
        let mut file = CppFile::new("cov.c", "", false);
        let b0 = file.add_block(BlockKind::If, "defined(CONFIG_A)", ROOT_ID, None, Location::new(1, 1));
        file.add_block(BlockKind::ElseIf, "defined(CONFIG_B)", ROOT_ID, Some(b0), Location::new(3, 1));
        file.decision_coverage();
        let (last, block) = file.blocks().last().unwrap();
        assert!(block.is_dummy());
        assert_eq!(block.prev(), Some(2));
        assert_eq!(file.block(last).parent(), Some(ROOT_ID));
        // a chain already ending in #else gains nothing
        let count = file.block_count();
        let mut file2 = chain_file();
        file2.decision_coverage();
        assert_eq!(file2.block_count(), 5 + 1); // only the outer B0 chain gets a dummy
        let _ = count;
    }

    #[test]
    fn build_condition_links_root_and_file_var() {
        let file = CppFile::new("mus_test.c", "", false);
        let condition = file.build_system_condition(&FilePresenceProvider);
        assert_eq!(condition, "( B00 <-> FILE_mus_test.c ) && FILE_mus_test.c");
    }

    #[test]
    fn block_at_position_picks_innermost() {
        let mut file = CppFile::new("pos.c", "", false);
        let b0 = file.add_block(BlockKind::If, "defined(A)", ROOT_ID, None, Location::new(1, 1));
        file.set_block_end(b0, Location::new(10, 1));
        let b1 = file.add_block(BlockKind::If, "defined(B)", b0, None, Location::new(3, 1));
        file.set_block_end(b1, Location::new(6, 1));
        assert_eq!(file.block_at_position(4), b1);
        assert_eq!(file.block_at_position(8), b0);
        assert_eq!(file.block_at_position(20), ROOT_ID);
    }
}
