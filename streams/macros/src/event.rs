use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, Type, parse_macro_input};

pub fn derive_event(input: TokenStream) -> TokenStream {
    // Parse the input tokens into a syntax tree
    let ast = parse_macro_input!(input as DeriveInput);

    let arg = match payload_type(&ast) {
        Ok(arg) => arg,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let arg = arg.map_or_else(|| quote! { Self }, |ty| quote! { #ty });

    // Use ::rusty_streams::Event which works both inside and outside the crate.
    // Inside the crate, this works because of `extern crate self as rusty_streams;` in lib.rs
    TokenStream::from(quote! {
        impl #impl_generics ::rusty_streams::Event for #name #ty_generics #where_clause {
            type Arg = #arg;
        }
    })
}

/// Read `#[event(arg = Type)]`, if present.
fn payload_type(ast: &DeriveInput) -> syn::Result<Option<Type>> {
    let mut arg = None;
    for attr in ast.attrs.iter().filter(|attr| attr.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("arg") {
                if arg.is_some() {
                    return Err(meta.error("duplicate `arg` in #[event]"));
                }
                arg = Some(meta.value()?.parse::<Type>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported #[event] key, expected `arg`"))
            }
        })?;
    }
    Ok(arg)
}
