//! Parser for the Swell language
//!
//! Recursive descent over the token vector. The parser stops at the first
//! syntax error; there is no recovery, so the whole parse returns
//! `Result<Module, Diagnostic>`.

use crate::ast::*;
use swell_error::{Diagnostic, ErrorCode, Result, Span, Spanned};
use swell_lexer::{Token, TokenKind};

/// Parses a token stream (as produced by `swell_lexer::Lexer`) into a module
pub fn parse(tokens: Vec<Token>) -> Result<Module> {
    Parser::new(tokens).parse_module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(
            matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)),
            "token stream must end with Eof"
        );
        Self { tokens, pos: 0 }
    }

    // =========================================
    // Helpers
    // =========================================

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("tokens are never empty"))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        token
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span)> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.peek().span;
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, what: &str) -> Diagnostic {
        Diagnostic::error(format!("expected {}", what))
            .with_code(ErrorCode::UNEXPECTED_TOKEN)
            .with_label(self.peek().span, format!("found `{}`", self.peek().kind))
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// Requires a statement terminator: a newline, or the closing brace of
    /// the enclosing block
    fn expect_terminator(&mut self) -> Result<()> {
        if self.check(&TokenKind::Newline) {
            self.skip_newlines();
            Ok(())
        } else if self.check(&TokenKind::RBrace) || self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of statement"))
        }
    }

    // =========================================
    // Declarations
    // =========================================

    fn parse_module(mut self) -> Result<Module> {
        let mut module = Module::default();
        self.skip_newlines();

        while self.check(&TokenKind::Import) {
            let start = self.advance().span;
            let (name, _) = self.expect_ident("a module name after `import`")?;
            module.imports.push(Import {
                module: name,
                span: start.merge(self.prev_span()),
            });
            self.expect_terminator()?;
        }

        while !self.is_at_end() {
            match self.peek().kind {
                TokenKind::Struct => module.structs.push(self.parse_struct()?),
                TokenKind::Sync | TokenKind::Native | TokenKind::Func => {
                    module.functions.push(self.parse_function()?)
                }
                _ => return Err(self.unexpected("a function or struct declaration")),
            }
            self.skip_newlines();
        }

        Ok(module)
    }

    fn parse_function(&mut self) -> Result<FnDecl> {
        let start = self.peek().span;
        let is_sync = self.match_token(&TokenKind::Sync);
        let is_native = self.match_token(&TokenKind::Native);
        self.expect(&TokenKind::Func, "`func`")?;
        let (name, _) = self.expect_ident("a function name")?;

        self.expect(&TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (pname, pspan) = self.expect_ident("a parameter name")?;
                self.expect(&TokenKind::Colon, "`:` after the parameter name")?;
                let ty = self.parse_type_rep()?;
                params.push(Param {
                    name: pname,
                    span: pspan.merge(self.prev_span()),
                    ty,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;

        self.expect(&TokenKind::Colon, "`:` before the return type")?;
        let mut returns = Vec::new();
        if self.match_token(&TokenKind::LParen) {
            loop {
                returns.push(self.parse_type_rep()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)` after the return types")?;
        } else {
            returns.push(self.parse_type_rep()?);
        }

        let body = if self.check(&TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };

        let decl = FnDecl {
            is_sync,
            is_native,
            name,
            params,
            returns,
            body,
            span: start.merge(self.prev_span()),
        };
        self.expect_terminator()?;
        Ok(decl)
    }

    fn parse_struct(&mut self) -> Result<StructDecl> {
        let start = self.advance().span; // `struct`
        let (name, _) = self.expect_ident("a struct name")?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        self.skip_newlines();

        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            fields.push(self.parse_type_rep()?);
            self.expect_terminator()?;
        }
        self.expect(&TokenKind::RBrace, "`}`")?;

        let decl = StructDecl {
            name,
            fields,
            span: start.merge(self.prev_span()),
        };
        self.expect_terminator()?;
        Ok(decl)
    }

    /// `&? Name ("[" typeRep ("," typeRep)* "]")?`
    fn parse_type_rep(&mut self) -> Result<TypeRep> {
        let start = self.peek().span;
        let borrowed = self.match_token(&TokenKind::Amp);
        let (name, _) = match &self.peek().kind {
            TokenKind::Ident(_) => self.expect_ident("a type name")?,
            _ => {
                return Err(Diagnostic::error("expected a type")
                    .with_code(ErrorCode::EXPECTED_TYPE)
                    .with_label(self.peek().span, format!("found `{}`", self.peek().kind)))
            }
        };

        let mut args = Vec::new();
        if self.match_token(&TokenKind::LBracket) {
            loop {
                args.push(self.parse_type_rep()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "`]` after the type arguments")?;
        }

        Ok(TypeRep {
            borrowed,
            name,
            args,
            span: start.merge(self.prev_span()),
        })
    }

    // =========================================
    // Statements
    // =========================================

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        self.skip_newlines();

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            statements.push(self.parse_stmt()?);
            self.expect_terminator()?;
        }
        self.expect(&TokenKind::RBrace, "`}`")?;

        Ok(Block { statements })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::Let => self.parse_bind(false),
            TokenKind::Set => self.parse_bind(true),
            TokenKind::Return => {
                let start = self.advance().span;
                let value = self.parse_expr()?;
                Ok(Stmt::Return {
                    span: start.merge(value.span),
                    value,
                })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                let start = self.advance().span;
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While {
                    cond,
                    body,
                    span: start.merge(self.prev_span()),
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                Ok(Stmt::Expr {
                    span: expr.span,
                    expr,
                })
            }
        }
    }

    fn parse_bind(&mut self, must_exist: bool) -> Result<Stmt> {
        let start = self.advance().span; // `let` / `set`
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident("a variable name")?;
            names.push(name);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Eq, "`=`")?;
        let value = self.parse_expr()?;
        Ok(Stmt::Bind {
            must_exist,
            names,
            span: start.merge(value.span),
            value,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.advance().span; // `if`
        let cond = self.parse_expr()?;
        let narrow = if self.match_token(&TokenKind::Is) {
            Some(self.parse_type_rep()?)
        } else {
            None
        };
        let then_block = self.parse_block()?;
        self.expect(&TokenKind::Else, "`else`")?;
        let else_block = self.parse_block()?;
        Ok(Stmt::If {
            cond,
            narrow,
            then_block,
            else_block,
            span: start.merge(self.prev_span()),
        })
    }

    // =========================================
    // Expressions
    // =========================================

    fn parse_expr(&mut self) -> Result<Expr> {
        let sum = self.parse_sum()?;
        let start = sum.span;

        let op = match self.peek().kind {
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };

        let compare = match op {
            Some(op) => {
                self.advance();
                let operand = self.parse_sum()?;
                Some(Comparison { op, operand })
            }
            None => None,
        };

        Ok(Expr {
            sum,
            compare,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_sum(&mut self) -> Result<SumExpr> {
        let first = self.parse_call()?;
        let start = first.span;
        let mut terms = Vec::new();
        while self.match_token(&TokenKind::Plus) {
            terms.push(self.parse_call()?);
        }
        Ok(SumExpr {
            first,
            terms,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_call(&mut self) -> Result<CallExpr> {
        let base = self.parse_base()?;
        let start = base.span();

        let mut calls = Vec::new();
        while self.check(&TokenKind::LParen) {
            let open = self.advance().span;
            let mut args = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_arg()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "`)` after the arguments")?;
            calls.push(CallArgs {
                args,
                span: open.merge(self.prev_span()),
            });
        }

        Ok(CallExpr {
            base,
            calls,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_arg(&mut self) -> Result<Arg> {
        if self.check(&TokenKind::Amp) {
            let start = self.advance().span;
            let (name, _) = self.expect_ident("a variable name after `&`")?;
            Ok(Arg::Borrow {
                name,
                span: start.merge(self.prev_span()),
            })
        } else {
            Ok(Arg::Expr(self.parse_expr()?))
        }
    }

    fn parse_base(&mut self) -> Result<BaseExpr> {
        let span = self.peek().span;
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(BaseExpr::Variable { name, span })
            }
            TokenKind::True => {
                self.advance();
                Ok(BaseExpr::BoolLit { value: true, span })
            }
            TokenKind::False => {
                self.advance();
                Ok(BaseExpr::BoolLit { value: false, span })
            }
            TokenKind::StringLit(value) => {
                self.advance();
                Ok(BaseExpr::StringLit { value, span })
            }
            TokenKind::IntLit(value) => {
                self.advance();
                Ok(BaseExpr::IntLit { value, span })
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = vec![self.parse_expr()?];
                if !self.check(&TokenKind::Comma) {
                    return Err(Diagnostic::error("a tuple needs at least two elements")
                        .with_code(ErrorCode::EXPECTED_EXPRESSION)
                        .with_label(self.peek().span, "expected `,` here")
                        .with_help("parentheses are only used for tuples and return lists"));
                }
                while self.match_token(&TokenKind::Comma) {
                    items.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RParen, "`)` after the tuple")?;
                Ok(BaseExpr::Tuple {
                    items,
                    span: span.merge(self.prev_span()),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = vec![self.parse_expr()?];
                while self.match_token(&TokenKind::Comma) {
                    items.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RBracket, "`]` after the array")?;
                Ok(BaseExpr::Array {
                    items,
                    span: span.merge(self.prev_span()),
                })
            }
            _ => Err(Diagnostic::error("expected an expression")
                .with_code(ErrorCode::EXPECTED_EXPRESSION)
                .with_label(span, format!("found `{}`", self.peek().kind))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swell_lexer::Lexer;

    fn parse_source(source: &str) -> Result<Module> {
        parse(Lexer::new(source, 0).tokenize()?)
    }

    #[test]
    fn parses_a_minimal_function() {
        let module = parse_source("func main(c: Clock): Clock {\n  return c\n}\n").unwrap();
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name, "main");
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.returns.len(), 1);
        assert_eq!(f.body.as_ref().unwrap().statements.len(), 1);
    }

    #[test]
    fn parses_modifiers_and_native_without_body() {
        let module =
            parse_source("sync native func concat(a: String, b: String): String\n").unwrap();
        let f = &module.functions[0];
        assert!(f.is_sync);
        assert!(f.is_native);
        assert!(f.body.is_none());
    }

    #[test]
    fn parses_imports_and_structs() {
        let module = parse_source(
            "import time\n\nstruct Point {\n  Integer\n  Integer\n}\n\nnative func zero(): Point\n",
        )
        .unwrap();
        assert_eq!(module.imports[0].module, "time");
        assert_eq!(module.structs[0].fields.len(), 2);
    }

    #[test]
    fn parses_multi_return_and_borrow_args() {
        let module = parse_source(
            "native func readLine(s: &Stream): String\nfunc go(s: Stream): Stream {\n  let name = readLine(&s)\n  return s\n}\n",
        )
        .unwrap();
        let f = &module.functions[1];
        match &f.body.as_ref().unwrap().statements[0] {
            Stmt::Bind { names, value, .. } => {
                assert_eq!(names, &["name".to_string()]);
                let call = &value.sum.first;
                assert!(matches!(
                    call.calls[0].args[0],
                    Arg::Borrow { ref name, .. } if name == "s"
                ));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn parses_if_with_narrowing() {
        let module = parse_source(
            "func f(u: Union[String, Integer]): Integer {\n  if u is String {\n    return 1\n  } else {\n    return 2\n  }\n}\n",
        )
        .unwrap();
        match &module.functions[0].body.as_ref().unwrap().statements[0] {
            Stmt::If { narrow: Some(t), .. } => assert_eq!(t.name, "String"),
            other => panic!("expected if-is, got {:?}", other),
        }
    }

    #[test]
    fn parses_while_and_comparison() {
        let module = parse_source(
            "func f(n: Integer): Integer {\n  while n < 10 {\n    set n = inc(n)\n  }\n  return n\n}\n",
        )
        .unwrap();
        match &module.functions[0].body.as_ref().unwrap().statements[0] {
            Stmt::While { cond, .. } => {
                assert_eq!(cond.compare.as_ref().unwrap().op, CompareOp::Lt);
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn parses_concat_chain_and_tuple() {
        let module = parse_source("func f(a: String): String {\n  let t, u = (a + \"!\", 3)\n  return t\n}\n")
            .unwrap();
        match &module.functions[0].body.as_ref().unwrap().statements[0] {
            Stmt::Bind { names, value, .. } => {
                assert_eq!(names.len(), 2);
                match &value.sum.first.base {
                    BaseExpr::Tuple { items, .. } => {
                        assert_eq!(items.len(), 2);
                        assert_eq!(items[0].sum.terms.len(), 1);
                    }
                    other => panic!("expected tuple, got {:?}", other),
                }
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn rejects_single_element_parens() {
        let err = parse_source("func f(a: String): String {\n  return (a)\n}\n").unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::EXPECTED_EXPRESSION));
    }

    #[test]
    fn rejects_missing_else() {
        let err = parse_source("func f(b: Boolean): Integer {\n  if b {\n    return 1\n  }\n  return 2\n}\n")
            .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNEXPECTED_TOKEN));
    }
}
