//! Directive stream input: the visitor contract and the tree builder.
//!
//! The preprocessor front-end is an external collaborator; it walks a file
//! and reports each conditional directive to a [`DirectiveVisitor`] in
//! source order. [`TreeBuilder`] is the visitor that assembles a
//! [`CppFile`] from that stream. [`scan_source`] is the built-in reference
//! front-end: a line-oriented scanner that handles continuations and
//! comments well enough for real-world kernel sources.

use crate::block::{BlockId, BlockKind, CppFile, Location, ROOT_ID};

/// Receiver for the linear directive stream of one source file.
pub trait DirectiveVisitor {
    fn visit_if(&mut self, expression: &str, loc: Location);
    fn visit_ifdef(&mut self, name: &str, loc: Location);
    fn visit_ifndef(&mut self, name: &str, loc: Location);
    fn visit_elif(&mut self, expression: &str, loc: Location);
    fn visit_else(&mut self, loc: Location);
    fn visit_endif(&mut self, loc: Location);
    fn visit_define(&mut self, name: &str, body: Option<&str>, loc: Location);
    fn visit_undef(&mut self, name: &str, loc: Location);
}

/// Builds the conditional-block tree from the directive stream.
pub struct TreeBuilder {
    file: CppFile,
    open: Vec<BlockId>,
    last_line: u32,
}

impl TreeBuilder {
    pub fn new(filename: impl Into<String>, arch: impl Into<String>, verbose_names: bool) -> Self {
        Self { file: CppFile::new(filename, arch, verbose_names), open: Vec::new(), last_line: 1 }
    }

    /// Innermost block the next directive belongs to.
    fn scope(&self) -> BlockId {
        self.open.last().copied().unwrap_or(ROOT_ID)
    }

    fn open_block(&mut self, kind: BlockKind, expression: &str, loc: Location) {
        let (parent, prev) = if matches!(kind, BlockKind::ElseIf | BlockKind::Else) {
            // an #elif/#else closes its predecessor and shares its parent
            let prev = self.open.pop();
            if let Some(prev) = prev {
                self.file.set_block_end(prev, loc);
            }
            let parent = prev.and_then(|p| self.file.block(p).parent()).unwrap_or(ROOT_ID);
            (parent, prev)
        } else {
            (self.scope(), None)
        };
        let id = self.file.add_block(kind, expression, parent, prev, loc);
        self.open.push(id);
    }

    /// Close the whole stream; unbalanced directives are closed forcibly.
    pub fn finish(mut self) -> CppFile {
        if !self.open.is_empty() {
            log::warn!(
                "{}: {} unterminated conditional block(s)",
                self.file.filename(),
                self.open.len()
            );
            let end = Location::new(self.last_line, 0);
            while let Some(id) = self.open.pop() {
                self.file.set_block_end(id, end);
            }
        }
        let end = Location::new(self.last_line, 0);
        self.file.set_block_end(ROOT_ID, end);
        self.file.late_construct();
        self.file
    }
}

impl DirectiveVisitor for TreeBuilder {
    fn visit_if(&mut self, expression: &str, loc: Location) {
        self.last_line = loc.line;
        self.open_block(BlockKind::If, expression, loc);
    }

    fn visit_ifdef(&mut self, name: &str, loc: Location) {
        self.last_line = loc.line;
        self.open_block(BlockKind::If, &format!("defined({name})"), loc);
    }

    fn visit_ifndef(&mut self, name: &str, loc: Location) {
        self.last_line = loc.line;
        self.open_block(BlockKind::If, &format!("!defined({name})"), loc);
    }

    fn visit_elif(&mut self, expression: &str, loc: Location) {
        self.last_line = loc.line;
        if self.open.is_empty() {
            log::warn!("{}:{}: #elif without #if", self.file.filename(), loc.line);
            return;
        }
        self.open_block(BlockKind::ElseIf, expression, loc);
    }

    fn visit_else(&mut self, loc: Location) {
        self.last_line = loc.line;
        if self.open.is_empty() {
            log::warn!("{}:{}: #else without #if", self.file.filename(), loc.line);
            return;
        }
        self.open_block(BlockKind::Else, "", loc);
    }

    fn visit_endif(&mut self, loc: Location) {
        self.last_line = loc.line;
        match self.open.pop() {
            Some(id) => self.file.set_block_end(id, loc),
            None => log::warn!("{}:{}: #endif without #if", self.file.filename(), loc.line),
        }
    }

    fn visit_define(&mut self, name: &str, body: Option<&str>, loc: Location) {
        self.last_line = loc.line;
        let scope = self.scope();
        self.file.add_define(name, body, scope, true);
    }

    fn visit_undef(&mut self, name: &str, loc: Location) {
        self.last_line = loc.line;
        let scope = self.scope();
        self.file.add_define(name, None, scope, false);
    }
}

/// Drive a visitor over the directives of a source text.
///
/// Line continuations are folded, `//` and single-line `/* */` comments are
/// stripped from directive lines, and everything that is not a conditional
/// or define directive is ignored.
pub fn scan_source(source: &str, visitor: &mut dyn DirectiveVisitor) {
    let mut lines = source.lines().enumerate().peekable();
    while let Some((index, line)) = lines.next() {
        let line_number = (index + 1) as u32;
        let Some(hash) = line.find('#') else { continue };
        if line[..hash].trim() != "" {
            continue;
        }
        let mut text = line.to_string();
        while text.trim_end().ends_with('\\') {
            let new_len = text.trim_end().len() - 1;
            text.truncate(new_len);
            match lines.next() {
                Some((_, next)) => {
                    text.push(' ');
                    text.push_str(next);
                }
                None => break,
            }
        }
        let text = strip_comments(&text);
        let after_hash = text[text.find('#').unwrap() + 1..].trim_start();
        let (word, rest) = split_word(after_hash);
        let rest = rest.trim();
        let loc = Location::new(line_number, (hash + 1) as u32);
        match word {
            "if" => visitor.visit_if(rest, loc),
            "ifdef" => visitor.visit_ifdef(first_word(rest), loc),
            "ifndef" => visitor.visit_ifndef(first_word(rest), loc),
            "elif" => visitor.visit_elif(rest, loc),
            "else" => visitor.visit_else(loc),
            "endif" => visitor.visit_endif(loc),
            "define" => {
                let (name, body) = split_define(rest);
                if !name.is_empty() {
                    visitor.visit_define(name, body, loc);
                }
            }
            "undef" => {
                let name = first_word(rest);
                if !name.is_empty() {
                    visitor.visit_undef(name, loc);
                }
            }
            _ => {}
        }
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_alphanumeric() && c != '_').unwrap_or(s.len());
    (&s[..end], &s[end..])
}

fn first_word(s: &str) -> &str {
    split_word(s.trim_start()).0
}

/// Name and single-identifier body of a `#define`. Function-like macros
/// keep their name but never a body; bodies that are not a lone identifier
/// are dropped, only definedness is tracked for them.
fn split_define(rest: &str) -> (&str, Option<&str>) {
    let rest = rest.trim_start();
    let (name, after) = split_word(rest);
    if after.starts_with('(') {
        return (name, None);
    }
    let body = after.trim();
    let (ident, tail) = split_word(body);
    if !ident.is_empty()
        && tail.trim().is_empty()
        && ident.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
    {
        (name, Some(ident))
    } else {
        (name, None)
    }
}

fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' {
            match chars.peek() {
                Some('/') => break,
                Some('*') => {
                    chars.next();
                    // skip to the end of the comment, if it closes here
                    let mut last = ' ';
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if last == '*' && c == '/' {
                            closed = true;
                            break;
                        }
                        last = c;
                    }
                    out.push(' ');
                    if !closed {
                        break;
                    }
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Parse a source text straight into a [`CppFile`].
pub fn parse_source(
    source: &str,
    filename: impl Into<String>,
    arch: impl Into<String>,
    verbose_names: bool,
) -> CppFile {
    let mut builder = TreeBuilder::new(filename, arch, verbose_names);
    scan_source(source, &mut builder);
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_ifdef_else() {
        let file = parse_source("#ifdef CONFIG_BAR\n\n#else\n\n#endif\n", "mus_test.c", "", false);
        assert_eq!(file.block_count(), 3);
        let b0 = file.block(1);
        assert_eq!(b0.name(), "B0");
        assert_eq!(b0.kind(), BlockKind::If);
        assert_eq!(b0.expression(), "CONFIG_BAR");
        assert_eq!(b0.start().line, 1);
        assert_eq!(b0.end().line, 3);
        let b1 = file.block(2);
        assert_eq!(b1.name(), "B1");
        assert!(b1.is_else());
        assert_eq!(b1.prev(), Some(1));
        assert_eq!(b1.parent(), Some(ROOT_ID));
        assert_eq!(b1.end().line, 5);
    }

    #[test]
    fn nested_chain_links_parent_and_prev() {
        let source = "#ifdef CONFIG_A\n#if defined(CONFIG_A)\n// B1\n#elif defined(CONFIG_B) || defined(CONFIG_C)\n// B2\n#else\n// B3\n#endif\n#endif\n";
        let file = parse_source(source, "correct_parentheses_for_elif.c", "", false);
        assert_eq!(file.block_count(), 5);
        let outer = file.block(1);
        assert_eq!(outer.parent(), Some(ROOT_ID));
        let b1 = file.block(2);
        let b2 = file.block(3);
        let b3 = file.block(4);
        assert_eq!(b1.parent(), Some(1));
        assert_eq!(b2.parent(), Some(1));
        assert_eq!(b3.parent(), Some(1));
        assert_eq!(b2.prev(), Some(2));
        assert_eq!(b3.prev(), Some(3));
        assert_eq!(b2.expression(), "CONFIG_B || CONFIG_C");
    }

    #[test]
    fn defines_are_tracked_with_their_scope() {
        let source = "#ifdef CONFIG_HOTPLUG\n#define FOO CONFIG_X\n#endif\n#if FOO\n#endif\n";
        let file = parse_source(source, "def.c", "", false);
        let define = file.define("FOO").unwrap();
        assert_eq!(define.replacement(), "FOO.");
        assert_eq!(define.constraint(), "( FOO. <-> ( ( B0 && CONFIG_X ) ) )");
        assert_eq!(file.block(2).expression(), "FOO.");
    }

    #[test]
    fn continuations_and_comments() {
        let source = "#if defined(CONFIG_A) || \\\n    defined(CONFIG_B) /* tail */\n#endif // closing\n";
        let file = parse_source(source, "cont.c", "", false);
        assert_eq!(file.block_count(), 2);
        assert_eq!(file.block(1).expression(), "CONFIG_A || CONFIG_B");
        assert_eq!(file.block(1).end().line, 3);
    }

    #[test]
    fn function_like_define_has_no_body() {
        let source = "#define MAX(a, b) ((a) > (b) ? (a) : (b))\n#define PLAIN CONFIG_Y\n#define EMPTY\n";
        let file = parse_source(source, "macros.c", "", false);
        assert_eq!(file.define("MAX").unwrap().constraint(), "( MAX. <-> ( B00 ) )");
        assert_eq!(
            file.define("PLAIN").unwrap().constraint(),
            "( PLAIN. <-> ( ( B00 && CONFIG_Y ) ) )"
        );
        assert_eq!(file.define("EMPTY").unwrap().constraint(), "( EMPTY. <-> ( B00 ) )");
    }

    #[test]
    fn unbalanced_input_is_closed_with_a_warning() {
        let file = parse_source("#ifdef CONFIG_A\nint x;\n", "broken.c", "", false);
        assert_eq!(file.block_count(), 2);
        assert_eq!(file.block(1).end().line, 1);
    }

    #[test]
    fn only_root_for_plain_files() {
        let file = parse_source("int main(void) { return 0; }\n", "plain.c", "", false);
        assert_eq!(file.block_count(), 1);
    }
}
