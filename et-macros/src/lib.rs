//! `#[derive(WireMessage)]` generates the big-endian encode/decode pair the
//! wire protocol needs for its fixed-layout request/response structs, so
//! `et-net`/`et-server` don't hand-write a `read`/`write` pair per opcode
//! the way `flux::session` does for a single struct.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

#[proc_macro_derive(WireMessage)]
pub fn derive_wire_message(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;

    let fields = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(&ast, "WireMessage requires named fields")
                    .to_compile_error()
                    .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&ast, "WireMessage can only be derived for structs")
                .to_compile_error()
                .into()
        }
    };

    let mut encode_stmts = Vec::new();
    let mut decode_stmts = Vec::new();
    let mut field_names = Vec::new();

    for field in fields {
        let ident = field.ident.as_ref().expect("named field");
        field_names.push(ident.clone());

        let (encode, decode) = match field_codec(ident, &field.ty) {
            Ok(pair) => pair,
            Err(err) => return err.to_compile_error().into(),
        };

        encode_stmts.push(encode);
        decode_stmts.push(decode);
    }

    let expanded = quote! {
        impl crate::WireMessage for #name {
            fn encode<W: ::std::io::Write>(&self, w: &mut W) -> ::std::io::Result<()> {
                use ::byteorder::{BigEndian, WriteBytesExt};
                #(#encode_stmts)*
                Ok(())
            }

            fn decode<R: ::std::io::Read>(r: &mut R) -> ::std::io::Result<Self> {
                use ::byteorder::{BigEndian, ReadBytesExt};
                #(#decode_stmts)*
                Ok(Self { #(#field_names),* })
            }
        }
    };

    expanded.into()
}

fn field_codec(
    ident: &syn::Ident,
    ty: &Type,
) -> syn::Result<(proc_macro2::TokenStream, proc_macro2::TokenStream)> {
    let type_name = match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_default(),
        Type::Array(array) => {
            let len = &array.len;
            return Ok((
                quote! { w.write_all(&self.#ident)?; },
                quote! {
                    let #ident = {
                        let mut buf = [0u8; #len];
                        r.read_exact(&mut buf)?;
                        buf
                    };
                },
            ));
        }
        _ => {
            return Err(syn::Error::new_spanned(
                ty,
                "unsupported WireMessage field type",
            ))
        }
    };

    let (read_fn, write_fn): (proc_macro2::TokenStream, proc_macro2::TokenStream) =
        match type_name.as_str() {
            "u8" => (
                quote! { r.read_u8()? },
                quote! { w.write_u8(self.#ident)?; },
            ),
            "i8" => (
                quote! { r.read_i8()? },
                quote! { w.write_i8(self.#ident)?; },
            ),
            "u16" => (
                quote! { r.read_u16::<BigEndian>()? },
                quote! { w.write_u16::<BigEndian>(self.#ident)?; },
            ),
            "i16" => (
                quote! { r.read_i16::<BigEndian>()? },
                quote! { w.write_i16::<BigEndian>(self.#ident)?; },
            ),
            "u32" => (
                quote! { r.read_u32::<BigEndian>()? },
                quote! { w.write_u32::<BigEndian>(self.#ident)?; },
            ),
            "i32" => (
                quote! { r.read_i32::<BigEndian>()? },
                quote! { w.write_i32::<BigEndian>(self.#ident)?; },
            ),
            "u64" => (
                quote! { r.read_u64::<BigEndian>()? },
                quote! { w.write_u64::<BigEndian>(self.#ident)?; },
            ),
            "i64" => (
                quote! { r.read_i64::<BigEndian>()? },
                quote! { w.write_i64::<BigEndian>(self.#ident)?; },
            ),
            other => {
                return Err(syn::Error::new_spanned(
                    ty,
                    format!("unsupported WireMessage field type `{other}`"),
                ))
            }
        };

    Ok((write_fn, quote! { let #ident = #read_fn; }))
}
