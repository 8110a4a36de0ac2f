// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Matcher source emitter.
//!
//! Renders a catalog as standalone Rust: one `parse_<i>(insn: u32) -> bool`
//! per record plus a `MATCHERS` dispatch table in catalog order.

use proc_macro2::{Literal, TokenStream};
use quote::{format_ident, quote};
use syn::{Expr, Ident};
use thiserror::Error;

use crate::catalog::PredicateCatalog;
use crate::diagram::Predicate;

/// Banner placed above the emitted source.
pub const GENERATED_HEADER: &str = "// AUTO-GENERATED FILE: DO NOT EDIT\n";

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("generated code is not valid Rust: {0}")]
    Syntax(#[from] syn::Error),
}

fn predicate_tokens(predicate: &Predicate) -> Result<TokenStream, syn::Error> {
    let expr: Expr = syn::parse_str(&predicate.render("insn"))?;
    Ok(quote! { #expr })
}

/// Token stream for the whole matcher module.
pub fn emit_tokens(catalog: &PredicateCatalog) -> Result<TokenStream, CodegenError> {
    let count = Literal::usize_unsuffixed(catalog.len());
    let names: Vec<_> = (0..catalog.len())
        .map(|i| format_ident!("parse_{}", i))
        .collect();

    let mut funcs = Vec::with_capacity(catalog.len());
    for (predicate, name) in catalog.iter().zip(&names) {
        let body = predicate_tokens(predicate)?;
        funcs.push(quote! {
            pub fn #name(insn: u32) -> bool {
                #body
            }
        });
    }

    Ok(quote! {
        #![allow(clippy::all, unused_parens)]

        pub static MATCHERS: [fn(u32) -> bool; #count] = [
            #(#names),*
        ];

        #(#funcs)*
    })
}

/// Pretty-printed matcher source, headed by [`GENERATED_HEADER`].
pub fn emit_source(catalog: &PredicateCatalog) -> Result<String, CodegenError> {
    unparse(emit_tokens(catalog)?)
}

fn unparse(tokens: TokenStream) -> Result<String, CodegenError> {
    let file: syn::File = syn::parse2(tokens)?;
    Ok(format!("{}{}", GENERATED_HEADER, prettyplease::unparse(&file)))
}

/// Mnemonic identifier for an `Op` variant; characters outside
/// `[A-Za-z0-9_]` become `_`.
fn op_ident(mnemonic: &str) -> Result<Ident, syn::Error> {
    let cleaned: String = mnemonic
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    syn::parse_str(&cleaned)
}

/// `pub fn <name>(op: Op) -> bool` returning true for every listed mnemonic.
pub fn emit_op_predicate(name: &str, ops: &[String]) -> Result<String, CodegenError> {
    let func: Ident = syn::parse_str(name)?;
    let variants = ops
        .iter()
        .map(|op| op_ident(op))
        .collect::<Result<Vec<_>, _>>()?;

    unparse(quote! {
        pub fn #func(op: Op) -> bool {
            match op {
                #(Op::#variants => true,)*
                _ => false,
            }
        }
    })
}
