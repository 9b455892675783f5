//! Proc-macro support for bitfield-backed I/O registers.
//!
//! The bus and peripheral registers in `nds-machines` are, per hardware,
//! raw 8/16/32-bit words with named bitfields overlaid on them. Rather than
//! hand-writing a getter/setter pair per field (and risking a mask/shift
//! typo), [`io_register!`] generates them from a declarative field list, with
//! the raw word kept as the single source of truth so partial-width writes
//! compose correctly.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Ident, LitInt, Token, Visibility, braced};

struct FieldSpec {
    name: Ident,
    lo: u8,
    hi: u8,
}

impl Parse for FieldSpec {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let lo: LitInt = input.parse()?;
        input.parse::<Token![..=]>()?;
        let hi: LitInt = input.parse()?;
        Ok(FieldSpec {
            name,
            lo: lo.base10_parse()?,
            hi: hi.base10_parse()?,
        })
    }
}

struct RegisterSpec {
    vis: Visibility,
    name: Ident,
    raw_ty: Ident,
    fields: Vec<FieldSpec>,
}

impl Parse for RegisterSpec {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let vis: Visibility = input.parse()?;
        input.parse::<Token![struct]>()?;
        let name: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let raw_ty: Ident = input.parse()?;
        let content;
        braced!(content in input);
        let fields = Punctuated::<FieldSpec, Token![,]>::parse_terminated(&content)?;
        Ok(RegisterSpec {
            vis,
            name,
            raw_ty,
            fields: fields.into_iter().collect(),
        })
    }
}

/// Declares a raw-word-backed bitfield register.
///
/// ```ignore
/// io_register! {
///     pub struct Ipccnt: u16 {
///         send_fifo_empty: 0..=0,
///         send_fifo_full: 1..=1,
///         send_irq_enable: 2..=2,
///         recv_fifo_empty: 8..=8,
///         recv_fifo_full: 9..=9,
///         recv_irq_enable: 10..=10,
///         error: 14..=14,
///         enable: 15..=15,
///     }
/// }
/// ```
///
/// Generates a `#[repr(transparent)]` struct wrapping `raw: u16`, one
/// `{field}()` getter and `set_{field}(value)` setter per field (masked and
/// shifted against the raw word), and `From`/`Default` impls. Every accessor
/// reads or writes through `raw` so a partial-width I/O write that only
/// touches some bytes still composes correctly with the rest.
#[proc_macro]
pub fn io_register(input: TokenStream) -> TokenStream {
    let spec = syn::parse_macro_input!(input as RegisterSpec);
    expand(&spec).into()
}

fn expand(spec: &RegisterSpec) -> TokenStream2 {
    let vis = &spec.vis;
    let name = &spec.name;
    let raw_ty = &spec.raw_ty;

    let accessors = spec.fields.iter().map(|f| {
        let getter = &f.name;
        let setter = format_ident!("set_{}", f.name);
        let width = f.hi - f.lo + 1;
        let lo = f.lo as u32;
        let mask_lit = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        let mask = syn::LitInt::new(&format!("0x{mask_lit:X}"), proc_macro2::Span::call_site());

        quote! {
            #[inline]
            #vis fn #getter(&self) -> #raw_ty {
                ((self.raw >> #lo) & (#mask as #raw_ty))
            }

            #[inline]
            #vis fn #setter(&mut self, value: #raw_ty) {
                let mask = (#mask as #raw_ty) << #lo;
                self.raw = (self.raw & !mask) | ((value << #lo) & mask);
            }
        }
    });

    quote! {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        #[repr(transparent)]
        #vis struct #name {
            pub raw: #raw_ty,
        }

        impl #name {
            #(#accessors)*
        }

        impl From<#raw_ty> for #name {
            fn from(raw: #raw_ty) -> Self {
                Self { raw }
            }
        }

        impl From<#name> for #raw_ty {
            fn from(reg: #name) -> #raw_ty {
                reg.raw
            }
        }
    }
}
