//! Lowering of parsed snippet source into unit images.
//!
//! Lowering resolves names, checks types and reports every problem as a
//! [`Diagnostic`] carrying byte offsets into the source. It keeps going after
//! an error so one compilation reports as much as it can; a poisoned
//! expression has type `!` so it never causes follow-on mismatches.

use std::ops::Range;

use proc_macro2::Span;
use quote::ToTokens;
use rustc_hash::FxHashMap;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;

use super::ir::{
    BinOp, Block, Callee, Expr, FactoryDef, FnDef, FnSig, Lambda, Lit, Method, Stmt, Ty, UnOp,
    UnitImage,
};
use crate::compile::{Diagnostic, LineIndex, Severity};
use crate::error::Result;

/// Name of the trait a unit implements to provide a processor.
pub const FACTORY_TRAIT: &str = "ProcessorFactory";

/// Name of the single method of [`FACTORY_TRAIT`].
pub const FACTORY_METHOD: &str = "processor";

/// Looks up already compiled units while lowering `use` items.
///
/// `Ok(None)` means no unit of that name exists. An error means one exists
/// but could not be read or decoded.
pub trait UnitResolver {
    fn resolve(&mut self, unit_name: &str) -> Result<Option<UnitImage>>;
}

/// Lowering result: the primary unit followed by auxiliary units.
#[derive(Debug, Default)]
pub struct Lowered {
    pub units: Vec<UnitImage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Lowered {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

/// Lower `file`, parsed from `source`, as unit `unit_name`.
pub fn lower_file<'a>(
    file: &syn::File,
    unit_name: &str,
    source: &'a str,
    source_name: &str,
    resolver: &'a mut dyn UnitResolver,
) -> Lowered {
    let lowerer = Lowerer {
        unit_name: unit_name.to_string(),
        source,
        source_name: source_name.to_string(),
        index: LineIndex::new(source),
        resolver,
        diagnostics: Vec::new(),
        imports: FxHashMap::default(),
        item_scopes: Vec::new(),
        references: FxHashMap::default(),
        aux: Vec::new(),
        aux_names: Vec::new(),
    };
    lowerer.lower(file)
}

struct Import {
    unit: String,
    functions: FxHashMap<String, FnSig>,
}

#[derive(Clone)]
struct FnEntry {
    callee: Callee,
    sig: FnSig,
}

struct LocalInfo {
    name: String,
    ty: Ty,
    mutable: bool,
    used: bool,
    span: Range<usize>,
    /// Closure nesting the local was declared at.
    depth: usize,
}

/// Per-function lowering state. Closures share their enclosing frame.
struct FnCtx {
    unit: String,
    ret: Ty,
    slots: Vec<LocalInfo>,
    scopes: Vec<Vec<usize>>,
    closure_depth: usize,
}

impl FnCtx {
    fn new(unit: &str, ret: Ty) -> Self {
        Self {
            unit: unit.to_string(),
            ret,
            slots: Vec::new(),
            scopes: vec![Vec::new()],
            closure_depth: 0,
        }
    }

    fn declare(&mut self, name: String, ty: Ty, mutable: bool, span: Range<usize>) -> usize {
        let slot = self.slots.len();
        self.slots.push(LocalInfo {
            name,
            ty,
            mutable,
            used: false,
            span,
            depth: self.closure_depth,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(slot);
        }
        slot
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .copied()
            .find(|&slot| self.slots[slot].name == name)
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) -> Vec<usize> {
        self.scopes.pop().unwrap_or_default()
    }
}

fn poison() -> (Expr, Ty) {
    (Expr::Lit(Lit::Unit), Ty::Never)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

struct Lowerer<'a> {
    unit_name: String,
    source: &'a str,
    source_name: String,
    index: LineIndex,
    resolver: &'a mut dyn UnitResolver,
    diagnostics: Vec<Diagnostic>,
    imports: FxHashMap<String, Import>,
    item_scopes: Vec<FxHashMap<String, FnEntry>>,
    references: FxHashMap<String, Vec<String>>,
    aux: Vec<UnitImage>,
    aux_names: Vec<String>,
}

impl Lowerer<'_> {
    fn range(&self, span: Span) -> Range<usize> {
        let start = span.start();
        let end = span.end();
        let from = self.index.offset(self.source, start.line, start.column);
        let to = self.index.offset(self.source, end.line, end.column);
        from..to.max(from)
    }

    fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        let range = self.range(span);
        self.diagnostics
            .push(Diagnostic::new(severity, message).at(self.source_name.clone(), range));
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    fn mismatch(&mut self, span: Span, expected: Ty, found: Ty) {
        self.error(
            span,
            format!("mismatched types: expected `{expected}`, found `{found}`"),
        );
    }

    fn simple_name(&self) -> &str {
        self.unit_name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.unit_name)
    }

    fn add_reference(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let refs = self.references.entry(from.to_string()).or_default();
        if !refs.iter().any(|r| r == to) {
            refs.push(to.to_string());
        }
    }

    fn lower(mut self, file: &syn::File) -> Lowered {
        let primary = self.unit_name.clone();
        let mut scope = FxHashMap::default();
        let mut fns = Vec::new();
        let mut declared_struct: Option<String> = None;
        let mut impls = Vec::new();

        for item in &file.items {
            match item {
                syn::Item::Use(item) => self.import(&item.tree, &mut Vec::new(), item.tree.span()),
                syn::Item::Fn(item) => {
                    if let Some(sig) = self.signature(&item.sig) {
                        let name = item.sig.ident.to_string();
                        if scope.contains_key(&name) {
                            self.error(
                                item.sig.ident.span(),
                                format!("the name `{name}` is defined multiple times"),
                            );
                            continue;
                        }
                        let callee = Callee {
                            unit: primary.clone(),
                            function: name.clone(),
                        };
                        scope.insert(name, FnEntry { callee, sig: sig.clone() });
                        fns.push((item, sig));
                    }
                }
                syn::Item::Struct(item) => self.declare_struct(item, &mut declared_struct),
                syn::Item::Impl(item) => impls.push(item),
                other => self.error(
                    other.span(),
                    "unsupported item; expected `use`, `fn`, `struct` or `impl`",
                ),
            }
        }
        self.item_scopes.push(scope);

        let mut functions = Vec::new();
        for (item, sig) in fns {
            functions.push(self.lower_fn(&primary, &item.sig, &item.block, sig));
        }

        let mut factory = None;
        for item in impls {
            let lowered = self.lower_impl(item, declared_struct.as_deref());
            if factory.is_some() && lowered.is_some() {
                self.error(
                    item.self_ty.span(),
                    format!("conflicting implementations of trait `{FACTORY_TRAIT}`"),
                );
            } else if lowered.is_some() {
                factory = lowered;
            }
        }

        let mut units = vec![UnitImage {
            references: self.references.remove(&primary).unwrap_or_default(),
            name: primary,
            source_name: self.source_name.clone(),
            functions,
            factory,
        }];
        units.append(&mut self.aux);
        Lowered {
            units,
            diagnostics: self.diagnostics,
        }
    }

    fn import(&mut self, tree: &syn::UseTree, prefix: &mut Vec<String>, span: Span) {
        match tree {
            syn::UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.import(&path.tree, prefix, span);
                prefix.pop();
            }
            syn::UseTree::Name(name) => self.add_import(prefix, &name.ident, &name.ident, span),
            syn::UseTree::Rename(rename) => {
                self.add_import(prefix, &rename.ident, &rename.rename, span)
            }
            syn::UseTree::Glob(glob) => {
                self.error(glob.star_token.span, "glob imports are not supported")
            }
            syn::UseTree::Group(group) => {
                for tree in &group.items {
                    self.import(tree, prefix, tree.span());
                }
            }
        }
    }

    fn add_import(
        &mut self,
        prefix: &[String],
        ident: &syn::Ident,
        alias: &syn::Ident,
        span: Span,
    ) {
        let mut path: Vec<String> = prefix.to_vec();
        path.push(ident.to_string());
        let unit = path.join(".");
        let alias_name = alias.to_string();
        if self.imports.contains_key(&alias_name) {
            self.error(
                alias.span(),
                format!("the name `{alias_name}` is defined multiple times"),
            );
            return;
        }
        match self.resolver.resolve(&unit) {
            Ok(Some(image)) => {
                let functions = image
                    .functions
                    .iter()
                    .map(|f| (f.name.clone(), f.sig.clone()))
                    .collect();
                tracing::debug!("Resolved import {} as {}", unit, alias_name);
                self.imports.insert(alias_name, Import { unit, functions });
            }
            Ok(None) => self.error(span, format!("unresolved import `{}`", path.join("::"))),
            Err(e) => self.error(
                span,
                format!("failed to resolve import `{}`: {e}", path.join("::")),
            ),
        }
    }

    fn declare_struct(&mut self, item: &syn::ItemStruct, declared: &mut Option<String>) {
        let name = item.ident.to_string();
        if !matches!(item.fields, syn::Fields::Unit) || !item.generics.params.is_empty() {
            self.error(item.span(), format!("`{name}` must be a unit struct: `struct {name};`"));
            return;
        }
        if name != self.simple_name() {
            let expected = self.simple_name().to_string();
            self.error(
                item.ident.span(),
                format!("struct `{name}` must be named after its unit `{expected}`"),
            );
            return;
        }
        if declared.is_some() {
            self.error(
                item.ident.span(),
                format!("the name `{name}` is defined multiple times"),
            );
            return;
        }
        *declared = Some(name);
    }

    fn ty(&mut self, ty: &syn::Type) -> Option<Ty> {
        match ty {
            syn::Type::Tuple(tuple) if tuple.elems.is_empty() => Some(Ty::Unit),
            syn::Type::Paren(paren) => self.ty(&paren.elem),
            syn::Type::Path(path) if path.qself.is_none() && path.path.segments.len() == 1 => {
                let segment = &path.path.segments[0];
                let name = segment.ident.to_string();
                let no_args = segment.arguments.is_none();
                let resolved = match name.as_str() {
                    "i64" if no_args => Some(Ty::Int),
                    "f64" if no_args => Some(Ty::Float),
                    "bool" if no_args => Some(Ty::Bool),
                    "String" if no_args => Some(Ty::Str),
                    "Value" if no_args => Some(Ty::Any),
                    "Stream" if no_args => Some(Ty::Stream),
                    "Processor" if no_args => Some(Ty::Processor),
                    "Vec" => {
                        let element = match &segment.arguments {
                            syn::PathArguments::AngleBracketed(args) if args.args.len() == 1 => {
                                match &args.args[0] {
                                    syn::GenericArgument::Type(t) => Some(self.ty(t)?),
                                    _ => None,
                                }
                            }
                            _ => None,
                        };
                        if element == Some(Ty::Any) {
                            Some(Ty::List)
                        } else {
                            self.error(
                                ty.span(),
                                format!(
                                    "unsupported type `{}`; lists are `Vec<Value>`",
                                    ty.to_token_stream()
                                ),
                            );
                            return None;
                        }
                    }
                    "i8" | "i16" | "i32" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
                    | "u128" | "usize" | "f32" | "char" | "str" => {
                        self.error(
                            ty.span(),
                            format!("unsupported type `{name}`; use `i64`, `f64` or `String`"),
                        );
                        return None;
                    }
                    _ => None,
                };
                if resolved.is_none() {
                    self.error(
                        segment.ident.span(),
                        format!("cannot find type `{name}` in this scope"),
                    );
                }
                resolved
            }
            other => {
                self.error(
                    other.span(),
                    format!("unsupported type `{}`", other.to_token_stream()),
                );
                None
            }
        }
    }

    fn signature(&mut self, sig: &syn::Signature) -> Option<FnSig> {
        let name = sig.ident.to_string();
        if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
            self.error(sig.generics.span(), "generic functions are not supported");
            return None;
        }
        if sig.asyncness.is_some() || sig.unsafety.is_some() || sig.variadic.is_some() {
            self.error(sig.span(), format!("function `{name}` must be a plain `fn`"));
            return None;
        }
        let mut params = Vec::new();
        let mut ok = true;
        for arg in &sig.inputs {
            match arg {
                syn::FnArg::Typed(pat) => match self.ty(&pat.ty) {
                    Some(ty) => params.push(ty),
                    None => ok = false,
                },
                syn::FnArg::Receiver(receiver) => {
                    self.error(
                        receiver.span(),
                        format!("`self` parameter is only allowed in `{FACTORY_METHOD}`"),
                    );
                    ok = false;
                }
            }
        }
        let ret = match &sig.output {
            syn::ReturnType::Default => Some(Ty::Unit),
            syn::ReturnType::Type(_, ty) => self.ty(ty),
        };
        Some(FnSig { params, ret: ret? }).filter(|_| ok)
    }

    /// Bind a parameter or `let` pattern. Returns the slot.
    fn bind(&mut self, cx: &mut FnCtx, pat: &syn::Pat, ty: Ty) -> usize {
        match pat {
            syn::Pat::Ident(ident) if ident.by_ref.is_none() && ident.subpat.is_none() => {
                let span = self.range(ident.ident.span());
                cx.declare(
                    ident.ident.to_string(),
                    ty,
                    ident.mutability.is_some(),
                    span,
                )
            }
            syn::Pat::Wild(_) => cx.declare("_".to_string(), ty, false, 0..0),
            other => {
                self.error(other.span(), "only simple name patterns are supported");
                cx.declare("_".to_string(), ty, false, 0..0)
            }
        }
    }

    fn finish_scope(&mut self, cx: &mut FnCtx) {
        for slot in cx.pop_scope() {
            let info = &cx.slots[slot];
            if !info.used && !info.name.starts_with('_') {
                let message = format!("unused variable: `{}`", info.name);
                let range = info.span.clone();
                self.diagnostics.push(
                    Diagnostic::warning(message).at(self.source_name.clone(), range),
                );
            }
        }
    }

    fn lower_fn(&mut self, unit: &str, sig: &syn::Signature, block: &syn::Block, fn_sig: FnSig) -> FnDef {
        let mut cx = FnCtx::new(unit, fn_sig.ret);
        for (arg, ty) in sig.inputs.iter().zip(&fn_sig.params) {
            if let syn::FnArg::Typed(pat) = arg {
                self.bind(&mut cx, &pat.pat, *ty);
            }
        }
        let (body, ty) = self.lower_block(&mut cx, block);
        if !ty.fits(fn_sig.ret) {
            let span = tail_span(block).unwrap_or_else(|| sig.output.span());
            self.mismatch(span, fn_sig.ret, ty);
        }
        self.finish_scope(&mut cx);
        FnDef {
            name: sig.ident.to_string(),
            sig: fn_sig,
            locals: cx.slots.len(),
            body,
        }
    }

    fn lower_impl(&mut self, item: &syn::ItemImpl, declared: Option<&str>) -> Option<FactoryDef> {
        let is_factory = item
            .trait_
            .as_ref()
            .and_then(|(bang, path, _)| bang.is_none().then_some(path))
            .and_then(|path| path.segments.last())
            .is_some_and(|segment| segment.ident == FACTORY_TRAIT);
        if !is_factory {
            self.error(
                item.impl_token.span,
                format!("only `impl {FACTORY_TRAIT} for <unit struct>` is supported"),
            );
            return None;
        }

        let self_name = match &*item.self_ty {
            syn::Type::Path(path) => path.path.get_ident().map(ToString::to_string),
            _ => None,
        };
        match (self_name, declared) {
            (Some(name), Some(declared)) if name == declared => {}
            (name, _) => {
                let name = name.unwrap_or_else(|| item.self_ty.to_token_stream().to_string());
                self.error(
                    item.self_ty.span(),
                    format!("cannot find type `{name}` in this scope"),
                );
                return None;
            }
        }

        let mut factory = None;
        for impl_item in &item.items {
            let syn::ImplItem::Fn(method) = impl_item else {
                self.error(
                    impl_item.span(),
                    format!("only `fn {FACTORY_METHOD}` may appear in this impl"),
                );
                continue;
            };
            let name = method.sig.ident.to_string();
            if name != FACTORY_METHOD {
                self.error(
                    method.sig.ident.span(),
                    format!("method `{name}` is not a member of trait `{FACTORY_TRAIT}`"),
                );
                continue;
            }
            if !self.check_factory_signature(&method.sig) {
                continue;
            }
            let mut cx = FnCtx::new(&self.unit_name.clone(), Ty::Processor);
            let (body, ty) = self.lower_block(&mut cx, &method.block);
            if !ty.fits(Ty::Processor) {
                let span = tail_span(&method.block).unwrap_or_else(|| method.block.span());
                self.mismatch(span, Ty::Processor, ty);
            }
            self.finish_scope(&mut cx);
            factory = Some(FactoryDef {
                locals: cx.slots.len(),
                body,
            });
        }
        if factory.is_none() && !self.has_errors() {
            self.error(
                item.self_ty.span(),
                format!("not all trait items implemented, missing: `{FACTORY_METHOD}`"),
            );
        }
        factory
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    fn check_factory_signature(&mut self, sig: &syn::Signature) -> bool {
        let receiver_ok = matches!(
            sig.inputs.first(),
            Some(syn::FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_none()
        );
        if !receiver_ok || sig.inputs.len() != 1 {
            self.error(
                sig.span(),
                format!("expected `fn {FACTORY_METHOD}(&self) -> Processor`"),
            );
            return false;
        }
        let ret = match &sig.output {
            syn::ReturnType::Default => Some(Ty::Unit),
            syn::ReturnType::Type(_, ty) => self.ty(ty),
        };
        match ret {
            Some(Ty::Processor) => true,
            Some(other) => {
                self.mismatch(sig.output.span(), Ty::Processor, other);
                false
            }
            None => false,
        }
    }

    fn lookup_fn(&self, name: &str) -> Option<FnEntry> {
        self.item_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
    }

    /// Reserve a unit name for nested fn `function`.
    fn aux_name(&mut self, function: &str) -> String {
        let base = format!("{}${function}", self.unit_name);
        let mut name = base.clone();
        let mut n = 1;
        while self.aux_names.contains(&name) {
            n += 1;
            name = format!("{base}${n}");
        }
        self.aux_names.push(name.clone());
        name
    }

    fn lower_block(&mut self, cx: &mut FnCtx, block: &syn::Block) -> (Block, Ty) {
        cx.push_scope();
        self.hoist_nested_fns(block);

        let mut stmts = Vec::new();
        let mut tail = None;
        let mut ty = Ty::Unit;
        let mut diverges = false;
        let count = block.stmts.len();
        for (i, stmt) in block.stmts.iter().enumerate() {
            let last = i + 1 == count;
            match stmt {
                syn::Stmt::Local(local) => {
                    if let Some((slot, init, init_ty)) = self.lower_local(cx, local) {
                        diverges |= init_ty == Ty::Never;
                        stmts.push(Stmt::Let(slot, init));
                    }
                }
                syn::Stmt::Item(syn::Item::Fn(_) | syn::Item::Use(_)) => {}
                syn::Stmt::Item(other) => {
                    self.error(other.span(), "only `fn` and `use` items may appear inside blocks")
                }
                syn::Stmt::Expr(expr, semi) => {
                    let (lowered, t) = self.lower_expr(cx, expr);
                    if last && semi.is_none() {
                        tail = Some(Box::new(lowered));
                        ty = t;
                    } else {
                        diverges |= t == Ty::Never;
                        stmts.push(Stmt::Expr(lowered));
                    }
                }
                syn::Stmt::Macro(mac) => {
                    let (lowered, t) = self.lower_macro(cx, &mac.mac);
                    if last && mac.semi_token.is_none() {
                        tail = Some(Box::new(lowered));
                        ty = t;
                    } else {
                        stmts.push(Stmt::Expr(lowered));
                    }
                }
            }
        }
        if tail.is_none() && diverges {
            ty = Ty::Never;
        }

        self.item_scopes.pop();
        self.finish_scope(cx);
        (Block { stmts, tail }, ty)
    }

    /// Register the `use` and `fn` items of `block`, lowering each `fn`
    /// into its own unit.
    fn hoist_nested_fns(&mut self, block: &syn::Block) {
        for stmt in &block.stmts {
            if let syn::Stmt::Item(syn::Item::Use(item)) = stmt {
                self.import(&item.tree, &mut Vec::new(), item.tree.span());
            }
        }

        let mut scope = FxHashMap::default();
        let mut nested = Vec::new();
        for stmt in &block.stmts {
            let syn::Stmt::Item(syn::Item::Fn(item)) = stmt else {
                continue;
            };
            let Some(sig) = self.signature(&item.sig) else {
                continue;
            };
            let function = item.sig.ident.to_string();
            if scope.contains_key(&function) {
                self.error(
                    item.sig.ident.span(),
                    format!("the name `{function}` is defined multiple times"),
                );
                continue;
            }
            let unit = self.aux_name(&function);
            let callee = Callee {
                unit: unit.clone(),
                function: function.clone(),
            };
            scope.insert(function, FnEntry { callee, sig: sig.clone() });
            nested.push((item, sig, unit));
        }
        self.item_scopes.push(scope);

        for (item, sig, unit) in nested {
            let def = self.lower_fn(&unit, &item.sig, &item.block, sig);
            tracing::debug!("Lowered nested fn {} as unit {}", def.name, unit);
            let references = self.references.remove(&unit).unwrap_or_default();
            self.aux.push(UnitImage {
                name: unit,
                source_name: self.source_name.clone(),
                functions: vec![def],
                factory: None,
                references,
            });
        }
    }

    fn lower_local(&mut self, cx: &mut FnCtx, local: &syn::Local) -> Option<(usize, Expr, Ty)> {
        let Some(init) = &local.init else {
            self.error(local.span(), "`let` without an initializer is not supported");
            return None;
        };
        if init.diverge.is_some() {
            self.error(local.span(), "`let ... else` is not supported");
            return None;
        }
        let (expr, init_ty) = self.lower_expr(cx, &init.expr);

        let (pat, declared) = match &local.pat {
            syn::Pat::Type(typed) => (&*typed.pat, Some(self.ty(&typed.ty)?)),
            other => (other, None),
        };
        let ty = match declared {
            Some(declared) => {
                if !init_ty.fits(declared) {
                    self.mismatch(init.expr.span(), declared, init_ty);
                }
                declared
            }
            None if init_ty == Ty::Never => Ty::Any,
            None => init_ty,
        };
        let slot = self.bind(cx, pat, ty);
        Some((slot, expr, init_ty))
    }

    fn lower_macro(&mut self, cx: &mut FnCtx, mac: &syn::Macro) -> (Expr, Ty) {
        if !mac.path.is_ident("vec") {
            let name = mac.path.to_token_stream().to_string();
            self.error(mac.path.span(), format!("unsupported macro `{name}!`"));
            return poison();
        }
        match mac.parse_body_with(Punctuated::<syn::Expr, syn::Token![,]>::parse_terminated) {
            Ok(elems) => self.lower_list(cx, elems.iter()),
            Err(e) => {
                self.error(e.span(), e.to_string());
                poison()
            }
        }
    }

    fn lower_list<'e>(
        &mut self,
        cx: &mut FnCtx,
        elems: impl Iterator<Item = &'e syn::Expr>,
    ) -> (Expr, Ty) {
        let mut items = Vec::new();
        for elem in elems {
            let (lowered, ty) = self.lower_expr(cx, elem);
            if !ty.fits(Ty::Any) {
                self.mismatch(elem.span(), Ty::Any, ty);
            }
            items.push(lowered);
        }
        (Expr::List(items), Ty::List)
    }

    fn lower_expr(&mut self, cx: &mut FnCtx, expr: &syn::Expr) -> (Expr, Ty) {
        match expr {
            syn::Expr::Lit(lit) => self.lower_lit(&lit.lit),
            syn::Expr::Path(path) => self.lower_path(cx, path),
            syn::Expr::Array(array) => self.lower_list(cx, array.elems.iter()),
            syn::Expr::Macro(mac) => self.lower_macro(cx, &mac.mac),
            syn::Expr::Paren(paren) => self.lower_expr(cx, &paren.expr),
            syn::Expr::Group(group) => self.lower_expr(cx, &group.expr),
            syn::Expr::Unary(unary) => self.lower_unary(cx, unary),
            syn::Expr::Binary(binary) => self.lower_binary(cx, binary),
            syn::Expr::Cast(cast) => self.lower_cast(cx, cast),
            syn::Expr::If(expr_if) => self.lower_if(cx, expr_if),
            syn::Expr::Block(block) if block.label.is_none() => {
                let (block, ty) = self.lower_block(cx, &block.block);
                (Expr::Block(block), ty)
            }
            syn::Expr::Call(call) => self.lower_call(cx, call),
            syn::Expr::MethodCall(call) => self.lower_method(cx, call),
            syn::Expr::Closure(closure) => {
                let Some((lambda, ty)) = self.lower_lambda(cx, closure, Ty::Stream) else {
                    return poison();
                };
                if !matches!(ty, Ty::Stream | Ty::List | Ty::Any | Ty::Never) {
                    self.mismatch(closure.body.span(), Ty::Stream, ty);
                }
                (Expr::Closure(lambda), Ty::Processor)
            }
            syn::Expr::Assign(assign) => self.lower_assign(cx, &assign.left, None, &assign.right),
            syn::Expr::ForLoop(for_loop) if for_loop.label.is_none() => {
                self.lower_for(cx, for_loop)
            }
            syn::Expr::Return(ret) => self.lower_return(cx, ret),
            other => {
                self.error(other.span(), "this expression is not supported in snippets");
                poison()
            }
        }
    }

    fn lower_lit(&mut self, lit: &syn::Lit) -> (Expr, Ty) {
        match lit {
            syn::Lit::Int(int) => match int.base10_parse::<i64>() {
                Ok(v) => (Expr::Lit(Lit::Int(v)), Ty::Int),
                Err(_) => {
                    self.error(int.span(), "integer literal is too large for `i64`");
                    poison()
                }
            },
            syn::Lit::Float(float) => match float.base10_parse::<f64>() {
                Ok(v) => (Expr::Lit(Lit::Float(v)), Ty::Float),
                Err(e) => {
                    self.error(float.span(), e.to_string());
                    poison()
                }
            },
            syn::Lit::Bool(b) => (Expr::Lit(Lit::Bool(b.value)), Ty::Bool),
            syn::Lit::Str(s) => (Expr::Lit(Lit::Str(s.value())), Ty::Str),
            other => {
                self.error(other.span(), "unsupported literal");
                poison()
            }
        }
    }

    fn lower_path(&mut self, cx: &mut FnCtx, path: &syn::ExprPath) -> (Expr, Ty) {
        let Some(ident) = path.path.get_ident().filter(|_| path.qself.is_none()) else {
            self.error(
                path.span(),
                format!(
                    "expected value, found `{}`",
                    path.path.to_token_stream().to_string().replace(' ', "")
                ),
            );
            return poison();
        };
        let name = ident.to_string();
        match cx.lookup(&name) {
            Some(slot) => {
                cx.slots[slot].used = true;
                (Expr::Local(slot), cx.slots[slot].ty)
            }
            None if self.lookup_fn(&name).is_some() => {
                self.error(
                    ident.span(),
                    format!("expected value, found function `{name}`; call it with `{name}(..)`"),
                );
                poison()
            }
            None => {
                self.error(ident.span(), format!("cannot find value `{name}` in this scope"));
                poison()
            }
        }
    }

    fn lower_unary(&mut self, cx: &mut FnCtx, unary: &syn::ExprUnary) -> (Expr, Ty) {
        let (operand, ty) = self.lower_expr(cx, &unary.expr);
        let (op, symbol) = match unary.op {
            syn::UnOp::Neg(_) => (UnOp::Neg, "-"),
            syn::UnOp::Not(_) => (UnOp::Not, "!"),
            _ => {
                self.error(unary.span(), "unsupported unary operator");
                return poison();
            }
        };
        let result = match (op, ty) {
            (_, Ty::Never) => Some(Ty::Never),
            (UnOp::Neg, t @ (Ty::Int | Ty::Float | Ty::Any)) => Some(t),
            (UnOp::Not, Ty::Bool | Ty::Any) => Some(Ty::Bool),
            _ => None,
        };
        match result {
            Some(t) => (Expr::Unary(op, Box::new(operand)), t),
            None => {
                self.error(
                    unary.span(),
                    format!("cannot apply unary operator `{symbol}` to type `{ty}`"),
                );
                poison()
            }
        }
    }

    fn lower_binary(&mut self, cx: &mut FnCtx, binary: &syn::ExprBinary) -> (Expr, Ty) {
        let compound = match binary.op {
            syn::BinOp::AddAssign(_) => Some(BinOp::Add),
            syn::BinOp::SubAssign(_) => Some(BinOp::Sub),
            syn::BinOp::MulAssign(_) => Some(BinOp::Mul),
            syn::BinOp::DivAssign(_) => Some(BinOp::Div),
            syn::BinOp::RemAssign(_) => Some(BinOp::Rem),
            _ => None,
        };
        if let Some(op) = compound {
            return self.lower_assign(cx, &binary.left, Some(op), &binary.right);
        }

        let op = match binary.op {
            syn::BinOp::Add(_) => BinOp::Add,
            syn::BinOp::Sub(_) => BinOp::Sub,
            syn::BinOp::Mul(_) => BinOp::Mul,
            syn::BinOp::Div(_) => BinOp::Div,
            syn::BinOp::Rem(_) => BinOp::Rem,
            syn::BinOp::Eq(_) => BinOp::Eq,
            syn::BinOp::Ne(_) => BinOp::Ne,
            syn::BinOp::Lt(_) => BinOp::Lt,
            syn::BinOp::Le(_) => BinOp::Le,
            syn::BinOp::Gt(_) => BinOp::Gt,
            syn::BinOp::Ge(_) => BinOp::Ge,
            syn::BinOp::And(_) => BinOp::And,
            syn::BinOp::Or(_) => BinOp::Or,
            _ => {
                self.error(binary.op.span(), "unsupported binary operator");
                return poison();
            }
        };
        let (left, lt) = self.lower_expr(cx, &binary.left);
        let (right, rt) = self.lower_expr(cx, &binary.right);
        match binary_ty(op, lt, rt) {
            Some(ty) => (Expr::Binary(op, Box::new(left), Box::new(right)), ty),
            None => {
                self.error(
                    binary.span(),
                    format!(
                        "cannot apply binary operator `{}` to types `{lt}` and `{rt}`",
                        op.symbol()
                    ),
                );
                poison()
            }
        }
    }

    fn lower_assign(
        &mut self,
        cx: &mut FnCtx,
        target: &syn::Expr,
        op: Option<BinOp>,
        value: &syn::Expr,
    ) -> (Expr, Ty) {
        let (rhs, rt) = self.lower_expr(cx, value);
        let ident = match target {
            syn::Expr::Path(path) if path.qself.is_none() => path.path.get_ident(),
            _ => None,
        };
        let Some(ident) = ident else {
            self.error(target.span(), "invalid left-hand side of assignment");
            return poison();
        };
        let name = ident.to_string();
        let Some(slot) = cx.lookup(&name) else {
            self.error(ident.span(), format!("cannot find value `{name}` in this scope"));
            return poison();
        };
        if !cx.slots[slot].mutable {
            self.error(
                target.span(),
                format!("cannot assign twice to immutable variable `{name}`"),
            );
            return poison();
        }
        if cx.slots[slot].depth < cx.closure_depth {
            // closures run on a copy of the enclosing frame
            self.error(
                target.span(),
                format!("cannot assign to captured variable `{name}` inside a closure"),
            );
            return poison();
        }
        let slot_ty = cx.slots[slot].ty;
        let value_ty = match op {
            Some(op) => {
                cx.slots[slot].used = true;
                match binary_ty(op, slot_ty, rt) {
                    Some(t) => t,
                    None => {
                        self.error(
                            value.span(),
                            format!(
                                "cannot apply binary operator `{}=` to types `{slot_ty}` and `{rt}`",
                                op.symbol()
                            ),
                        );
                        return poison();
                    }
                }
            }
            None => rt,
        };
        if !value_ty.fits(slot_ty) {
            self.mismatch(value.span(), slot_ty, value_ty);
        }
        let lowered = match op {
            Some(op) => Expr::CompoundAssign(op, slot, Box::new(rhs)),
            None => Expr::Assign(slot, Box::new(rhs)),
        };
        (lowered, Ty::Unit)
    }

    fn lower_cast(&mut self, cx: &mut FnCtx, cast: &syn::ExprCast) -> (Expr, Ty) {
        let (operand, from) = self.lower_expr(cx, &cast.expr);
        let Some(to) = self.ty(&cast.ty) else {
            return poison();
        };
        if !matches!(to, Ty::Int | Ty::Float) {
            self.error(cast.ty.span(), "only `as i64` and `as f64` casts are supported");
            return poison();
        }
        if !matches!(from, Ty::Int | Ty::Float | Ty::Bool | Ty::Any | Ty::Never) {
            self.error(cast.span(), format!("non-primitive cast: `{from}` as `{to}`"));
            return poison();
        }
        (Expr::Cast(Box::new(operand), to), to)
    }

    fn lower_if(&mut self, cx: &mut FnCtx, expr_if: &syn::ExprIf) -> (Expr, Ty) {
        let (cond, ct) = self.lower_expr(cx, &expr_if.cond);
        if !ct.fits(Ty::Bool) {
            self.mismatch(expr_if.cond.span(), Ty::Bool, ct);
        }
        let (then, tt) = self.lower_block(cx, &expr_if.then_branch);
        let Some((_, else_expr)) = &expr_if.else_branch else {
            return (Expr::If(Box::new(cond), then, None), Ty::Unit);
        };
        let (otherwise, et) = self.lower_expr(cx, else_expr);
        let ty = match tt.unify(et) {
            Some(ty) => ty,
            None => {
                self.error(
                    else_expr.span(),
                    format!("`if` and `else` have incompatible types: expected `{tt}`, found `{et}`"),
                );
                Ty::Never
            }
        };
        (
            Expr::If(Box::new(cond), then, Some(Box::new(otherwise))),
            ty,
        )
    }

    fn lower_call(&mut self, cx: &mut FnCtx, call: &syn::ExprCall) -> (Expr, Ty) {
        let syn::Expr::Path(path) = &*call.func else {
            self.error(call.func.span(), "only named functions can be called");
            return poison();
        };
        let segments: Vec<String> = path
            .path
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        let entry = match segments.as_slice() {
            [name] => match self.lookup_fn(name) {
                Some(entry) => entry,
                None => {
                    self.error(
                        path.span(),
                        format!("cannot find function `{name}` in this scope"),
                    );
                    return poison();
                }
            },
            [alias, name] => {
                let Some(import) = self.imports.get(alias) else {
                    self.error(
                        path.path.segments[0].ident.span(),
                        format!("failed to resolve: use of undeclared type `{alias}`"),
                    );
                    return poison();
                };
                match import.functions.get(name) {
                    Some(sig) => FnEntry {
                        callee: Callee {
                            unit: import.unit.clone(),
                            function: name.clone(),
                        },
                        sig: sig.clone(),
                    },
                    None => {
                        self.error(
                            path.path.segments[1].ident.span(),
                            format!("cannot find function `{name}` in `{alias}`"),
                        );
                        return poison();
                    }
                }
            }
            _ => {
                self.error(path.span(), "unsupported path");
                return poison();
            }
        };

        if call.args.len() != entry.sig.params.len() {
            let supplied = call.args.len();
            self.error(
                call.span(),
                format!(
                    "this function takes {} but {} {} supplied",
                    plural(entry.sig.params.len(), "argument"),
                    plural(supplied, "argument"),
                    if supplied == 1 { "was" } else { "were" }
                ),
            );
            return poison();
        }
        let mut args = Vec::new();
        for (arg, expected) in call.args.iter().zip(&entry.sig.params) {
            let (lowered, ty) = self.lower_expr(cx, arg);
            if !ty.fits(*expected) {
                self.mismatch(arg.span(), *expected, ty);
            }
            args.push(lowered);
        }
        self.add_reference(&cx.unit.clone(), &entry.callee.unit);
        (Expr::Call(entry.callee, args), entry.sig.ret)
    }

    fn lower_method(&mut self, cx: &mut FnCtx, call: &syn::ExprMethodCall) -> (Expr, Ty) {
        let (receiver, recv_ty) = self.lower_expr(cx, &call.receiver);
        let name = call.method.to_string();
        if call.turbofish.is_some() {
            self.error(call.span(), "turbofish syntax is not supported");
            return poison();
        }
        let Some(method) = Method::from_name(&name) else {
            self.error(
                call.method.span(),
                format!("no method named `{name}` found for type `{recv_ty}`"),
            );
            return poison();
        };
        if recv_ty == Ty::Never {
            return poison();
        }

        if method.is_stream_op() {
            if recv_ty != Ty::Stream {
                self.error(
                    call.method.span(),
                    format!("no method named `{name}` found for type `{recv_ty}`"),
                );
                return poison();
            }
            if call.args.len() != 1 {
                self.arity_error(call, 1);
                return poison();
            }
            let arg = &call.args[0];
            let lowered = match method {
                Method::Map | Method::Filter => {
                    let syn::Expr::Closure(closure) = arg else {
                        self.error(arg.span(), format!("`{name}` expects a closure `|x| ...`"));
                        return poison();
                    };
                    let Some((lambda, body_ty)) = self.lower_lambda(cx, closure, Ty::Any) else {
                        return poison();
                    };
                    if method == Method::Filter && !body_ty.fits(Ty::Bool) {
                        self.mismatch(closure.body.span(), Ty::Bool, body_ty);
                    } else if method == Method::Map && !body_ty.fits(Ty::Any) {
                        self.mismatch(closure.body.span(), Ty::Any, body_ty);
                    }
                    Expr::Closure(lambda)
                }
                _ => {
                    let (lowered, ty) = self.lower_expr(cx, arg);
                    if !ty.fits(Ty::Int) {
                        self.mismatch(arg.span(), Ty::Int, ty);
                    }
                    lowered
                }
            };
            return (
                Expr::Method(method, Box::new(receiver), vec![lowered]),
                Ty::Stream,
            );
        }

        let Some((params, ret)) = method_sig(method, recv_ty) else {
            self.error(
                call.method.span(),
                format!("no method named `{name}` found for type `{recv_ty}`"),
            );
            return poison();
        };
        if call.args.len() != params.len() {
            self.arity_error(call, params.len());
            return poison();
        }
        let mut args = Vec::new();
        for (arg, expected) in call.args.iter().zip(&params) {
            let (lowered, ty) = self.lower_expr(cx, arg);
            if !ty.fits(*expected) {
                self.mismatch(arg.span(), *expected, ty);
            }
            args.push(lowered);
        }
        (Expr::Method(method, Box::new(receiver), args), ret)
    }

    fn arity_error(&mut self, call: &syn::ExprMethodCall, expected: usize) {
        let supplied = call.args.len();
        self.error(
            call.span(),
            format!(
                "this method takes {} but {} {} supplied",
                plural(expected, "argument"),
                plural(supplied, "argument"),
                if supplied == 1 { "was" } else { "were" }
            ),
        );
    }

    /// Lower a one-parameter closure whose parameter has type `param`.
    fn lower_lambda(
        &mut self,
        cx: &mut FnCtx,
        closure: &syn::ExprClosure,
        param: Ty,
    ) -> Option<(Lambda, Ty)> {
        if closure.asyncness.is_some() {
            self.error(closure.span(), "async closures are not supported");
            return None;
        }
        if closure.inputs.len() != 1 {
            self.error(
                closure.or1_token.span,
                format!(
                    "closures take exactly one parameter, found {}",
                    closure.inputs.len()
                ),
            );
            return None;
        }
        let pat = &closure.inputs[0];
        let pat = match pat {
            syn::Pat::Type(typed) => {
                let declared = self.ty(&typed.ty)?;
                if declared != param {
                    self.mismatch(typed.ty.span(), param, declared);
                }
                &*typed.pat
            }
            other => other,
        };
        cx.push_scope();
        cx.closure_depth += 1;
        let slot = self.bind(cx, pat, param);
        let (body, ty) = self.lower_expr(cx, &closure.body);
        cx.closure_depth -= 1;
        self.finish_scope(cx);
        Some((
            Lambda {
                param: slot,
                body: Box::new(body),
            },
            ty,
        ))
    }

    fn lower_for(&mut self, cx: &mut FnCtx, for_loop: &syn::ExprForLoop) -> (Expr, Ty) {
        let (iter, ty) = self.lower_expr(cx, &for_loop.expr);
        if !matches!(ty, Ty::List | Ty::Stream | Ty::Any | Ty::Never) {
            self.error(for_loop.expr.span(), format!("`{ty}` is not an iterator"));
        }
        cx.push_scope();
        let slot = self.bind(cx, &for_loop.pat, Ty::Any);
        let (body, _) = self.lower_block(cx, &for_loop.body);
        self.finish_scope(cx);
        (Expr::For(slot, Box::new(iter), body), Ty::Unit)
    }

    fn lower_return(&mut self, cx: &mut FnCtx, ret: &syn::ExprReturn) -> (Expr, Ty) {
        if cx.closure_depth > 0 {
            self.error(ret.span(), "`return` inside closures is not supported");
            return poison();
        }
        let value = match &ret.expr {
            Some(expr) => {
                let (lowered, ty) = self.lower_expr(cx, expr);
                if !ty.fits(cx.ret) {
                    self.mismatch(expr.span(), cx.ret, ty);
                }
                Some(Box::new(lowered))
            }
            None => {
                if !Ty::Unit.fits(cx.ret) {
                    self.mismatch(ret.span(), cx.ret, Ty::Unit);
                }
                None
            }
        };
        (Expr::Return(value), Ty::Never)
    }
}

/// Span of a block's trailing expression, if it has one.
fn tail_span(block: &syn::Block) -> Option<Span> {
    match block.stmts.last() {
        Some(syn::Stmt::Expr(expr, None)) => Some(expr.span()),
        _ => None,
    }
}

fn binary_ty(op: BinOp, l: Ty, r: Ty) -> Option<Ty> {
    let widen = |t: Ty| if t == Ty::Never { Ty::Any } else { t };
    let (l, r) = (widen(l), widen(r));
    if op.is_arithmetic() {
        return match (l, r) {
            (Ty::Int, Ty::Int) => Some(Ty::Int),
            (Ty::Int | Ty::Float, Ty::Int | Ty::Float) => Some(Ty::Float),
            (Ty::Str, Ty::Str) if op == BinOp::Add => Some(Ty::Str),
            (Ty::Any, t) | (t, Ty::Any) if matches!(t, Ty::Int | Ty::Float | Ty::Str | Ty::Any) => {
                Some(Ty::Any)
            }
            _ => None,
        };
    }
    if op.is_logical() {
        return matches!((l, r), (Ty::Bool | Ty::Any, Ty::Bool | Ty::Any)).then_some(Ty::Bool);
    }
    let equality = matches!(op, BinOp::Eq | BinOp::Ne);
    let comparable = match (l, r) {
        (a, b) if a == b => {
            a.is_data() && (equality || matches!(a, Ty::Int | Ty::Float | Ty::Str | Ty::Any))
        }
        (Ty::Int | Ty::Float, Ty::Int | Ty::Float) => true,
        (Ty::Any, t) | (t, Ty::Any) => t.is_data(),
        _ => false,
    };
    comparable.then_some(Ty::Bool)
}

fn method_sig(method: Method, recv: Ty) -> Option<(Vec<Ty>, Ty)> {
    Some(match (method, recv) {
        (Method::Get, Ty::List | Ty::Any) => (vec![Ty::Int], Ty::Any),
        (Method::Sum | Method::First | Method::Last, Ty::List | Ty::Any) => (vec![], Ty::Any),
        (Method::Len, Ty::List | Ty::Str | Ty::Any) => (vec![], Ty::Int),
        (Method::IsEmpty, Ty::List | Ty::Str | Ty::Any) => (vec![], Ty::Bool),
        (Method::Contains, Ty::Str) => (vec![Ty::Str], Ty::Bool),
        (Method::Contains, Ty::List | Ty::Any) => (vec![Ty::Any], Ty::Bool),
        (Method::ToUppercase | Method::ToLowercase | Method::Trim, Ty::Str | Ty::Any) => {
            (vec![], Ty::Str)
        }
        (Method::ParseInt, Ty::Str | Ty::Int | Ty::Any) => (vec![], Ty::Int),
        (Method::ParseFloat, Ty::Str | Ty::Int | Ty::Float | Ty::Any) => (vec![], Ty::Float),
        (Method::Abs, t @ (Ty::Int | Ty::Float | Ty::Any)) => (vec![], t),
        (Method::Min | Method::Max, t @ (Ty::Int | Ty::Float | Ty::Any)) => (vec![t], t),
        (Method::ToString, t) if t.is_data() => (vec![], Ty::Str),
        _ => return None,
    })
}
