//! Derive macro generating fixed-width, big-endian wire encode/decode
//! methods for a struct of unsigned integer fields.
//!
//! This replaces the teacher's `COPY_IN`/`COPY_OUT`-style manual
//! byte-twiddling (and its own `apply_mem` derive, which never grew
//! past a stub) with one generated accessor pair per wire struct:
//! `to_be_bytes_vec` / `from_be_bytes`. Used for the recovery-info
//! trailer and `MultiChunkInfo` frames, whose fields are exactly
//! u16/u32/u64 network-byte-order integers.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

#[proc_macro_derive(WireCodec)]
pub fn derive_wire_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => panic!("WireCodec only supports structs with named fields"),
        },
        _ => panic!("WireCodec only supports structs"),
    };

    let mut field_ident = Vec::new();
    let mut field_size = Vec::new();

    for f in fields {
        let ident = f.ident.clone().expect("named field");
        let size = match &f.ty {
            Type::Path(tp) => {
                let seg = tp.path.segments.last().unwrap().ident.to_string();
                match seg.as_str() {
                    "u16" => 2usize,
                    "u32" => 4usize,
                    "u64" => 8usize,
                    other => panic!("WireCodec field `{ident}` has unsupported type `{other}`; only u16/u32/u64 are supported"),
                }
            }
            _ => panic!("WireCodec field `{ident}` has an unsupported type"),
        };
        field_ident.push(ident);
        field_size.push(size);
    }

    let wire_len: usize = field_size.iter().sum();

    let encode_stmts = field_ident.iter().map(|id| {
        quote! { out.extend_from_slice(&self.#id.to_be_bytes()); }
    });

    let mut offset = 0usize;
    let decode_stmts = field_ident.iter().zip(field_size.iter()).map(|(id, size)| {
        let start = offset;
        let end = offset + size;
        offset = end;
        match size {
            2 => quote! { let #id = u16::from_be_bytes(buf[#start..#end].try_into().unwrap()); },
            4 => quote! { let #id = u32::from_be_bytes(buf[#start..#end].try_into().unwrap()); },
            8 => quote! { let #id = u64::from_be_bytes(buf[#start..#end].try_into().unwrap()); },
            _ => unreachable!(),
        }
    });

    let field_names = field_ident.clone();

    let expanded = quote! {
        impl #name {
            pub const WIRE_LEN: usize = #wire_len;

            pub fn to_be_bytes_vec(&self) -> Vec<u8> {
                let mut out = Vec::with_capacity(Self::WIRE_LEN);
                #(#encode_stmts)*
                out
            }

            pub fn from_be_bytes(buf: &[u8]) -> Result<Self, crate::error::WireFrameError> {
                if buf.len() < Self::WIRE_LEN {
                    return Err(crate::error::WireFrameError::ShortBuffer {
                        need: Self::WIRE_LEN,
                        got: buf.len(),
                    });
                }
                #(#decode_stmts)*
                Ok(Self { #(#field_names),* })
            }
        }
    };

    TokenStream::from(expanded)
}
