//! Derive macro for error enums.
//!
//! Generates `std::fmt::Display` and `std::error::Error`, and a `From` impl for
//! every single-field tuple variant whose field is marked `#[from]`.
//!
//! ```ignore
//! use contract_runtime_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum NefError {
//!     #[error("bad magic: {0:#x}")]
//!     BadMagic(u32),
//!
//!     #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
//!     ChecksumMismatch { expected: u32, actual: u32 },
//!
//!     #[error("decode error: {0}")]
//!     Decode(#[from] DecodeError),
//! }
//! ```

use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand_error_derive(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_error_derive(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let Data::Enum(data_enum) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Error derive supports enums only",
        ));
    };

    let mut display_arms = Vec::new();
    let mut source_arms = Vec::new();
    let mut from_impls = Vec::new();

    for variant in &data_enum.variants {
        let variant_name = &variant.ident;
        let error_msg = extract_error_message(&variant.attrs, variant)?;

        match &variant.fields {
            Fields::Unit => {
                display_arms.push(quote! {
                    Self::#variant_name => write!(f, #error_msg),
                });
            }
            Fields::Unnamed(fields) => {
                let field_names: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| quote::format_ident!("f{}", i))
                    .collect();
                let format_str = convert_positional_to_named(&error_msg, fields.unnamed.len());
                display_arms.push(quote! {
                    #[allow(unused_variables)]
                    Self::#variant_name(#(#field_names),*) => write!(f, #format_str),
                });

                let from_field = fields
                    .unnamed
                    .iter()
                    .find(|field| field.attrs.iter().any(|a| a.path().is_ident("from")));
                if let Some(field) = from_field {
                    if fields.unnamed.len() != 1 {
                        return Err(syn::Error::new_spanned(
                            variant,
                            "#[from] is only supported on single-field tuple variants",
                        ));
                    }
                    let ty = &field.ty;
                    from_impls.push(quote! {
                        impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
                            fn from(source: #ty) -> Self {
                                Self::#variant_name(source)
                            }
                        }
                    });
                    source_arms.push(quote! {
                        Self::#variant_name(source) => Some(source),
                    });
                }
            }
            Fields::Named(fields) => {
                let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                display_arms.push(quote! {
                    #[allow(unused_variables)]
                    Self::#variant_name { #(#field_names),* } => write!(f, #error_msg),
                });
            }
        }
    }

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {
            fn source(&self) -> ::std::option::Option<&(dyn ::std::error::Error + 'static)> {
                #[allow(unreachable_patterns)]
                match self {
                    #(#source_arms)*
                    _ => None,
                }
            }
        }

        #(#from_impls)*
    })
}

/// Reads the message of the `#[error("...")]` attribute.
fn extract_error_message<T: ToTokens>(attrs: &[syn::Attribute], target: &T) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(meta_list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")]",
            ));
        };
        let lit = syn::parse2::<Lit>(meta_list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "failed to parse #[error] attribute; expected a string literal",
            )
        })?;
        if let Lit::Str(lit_str) = lit {
            return Ok(lit_str.value());
        }
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a string literal",
        ));
    }

    Err(syn::Error::new_spanned(
        target,
        "missing #[error(\"...\")] attribute; every error variant must declare a display message",
    ))
}

/// Rewrites `{0}`, `{1:#x}` into `{f0}`, `{f1:#x}` so the format string captures the
/// bound tuple fields by name.
fn convert_positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result
            .replace(&format!("{{{}}}", i), &format!("{{f{}}}", i))
            .replace(&format!("{{{}:", i), &format!("{{f{}:", i));
    }
    result
}
