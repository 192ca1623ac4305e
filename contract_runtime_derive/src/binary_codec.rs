//! Derive macro for the binary layout of contract artifacts.
//!
//! Generates `Encode` and `Decode` implementations against `crate::types::encoding`.
//!
//! # Supported Types
//!
//! - **Named structs**: `struct MethodToken { hash: Address, method: String }`
//! - **Tuple structs**: `struct Address(pub [u8; 20])`
//! - **Fieldless enums**: encoded as their `u8` discriminant
//!
//! Fields are written in declaration order, so the layout is exactly what the
//! struct definition says. Variable-length fields carry an 8-byte length prefix.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DataEnum, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                (
                    quote! {
                        #( crate::types::encoding::Encode::encode(&self.#names, out); )*
                    },
                    quote! {
                        Ok(Self {
                            #( #names: crate::types::encoding::Decode::decode(input)?, )*
                        })
                    },
                )
            }
            Fields::Unnamed(fields) => {
                let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
                let decodes = indices.iter().map(|_| {
                    quote! { crate::types::encoding::Decode::decode(input)?, }
                });
                (
                    quote! {
                        #( crate::types::encoding::Encode::encode(&self.#indices, out); )*
                    },
                    quote! { Ok(Self( #(#decodes)* )) },
                )
            }
            Fields::Unit => (quote! {}, quote! { Ok(Self) }),
        },
        Data::Enum(data) => expand_enum(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

/// Fieldless enums only: the wire value is the `u8` discriminant.
fn expand_enum(
    data: &DataEnum,
) -> syn::Result<(proc_macro2::TokenStream, proc_macro2::TokenStream)> {
    let mut next: u8 = 0;
    let mut encode_arms = Vec::new();
    let mut decode_arms = Vec::new();

    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "BinaryCodec derive supports fieldless enum variants only",
            ));
        }
        let discriminant = match &variant.discriminant {
            Some((_, expr)) => parse_discriminant(expr)?,
            None => next,
        };
        next = discriminant.wrapping_add(1);

        let ident = &variant.ident;
        encode_arms.push(quote! {
            Self::#ident => crate::types::encoding::Encode::encode(&#discriminant, out),
        });
        decode_arms.push(quote! {
            #discriminant => Ok(Self::#ident),
        });
    }

    Ok((
        quote! {
            match self {
                #(#encode_arms)*
            }
        },
        quote! {
            let tag: u8 = crate::types::encoding::Decode::decode(input)?;
            match tag {
                #(#decode_arms)*
                _ => Err(crate::types::encoding::DecodeError::InvalidValue),
            }
        },
    ))
}

fn parse_discriminant(expr: &syn::Expr) -> syn::Result<u8> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Int(lit),
        ..
    }) = expr
    {
        return lit.base10_parse::<u8>();
    }
    Err(syn::Error::new_spanned(
        expr,
        "discriminant must be an integer literal that fits in a u8",
    ))
}
