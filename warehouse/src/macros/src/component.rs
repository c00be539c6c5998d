use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

pub fn derive_component(input: TokenStream) -> TokenStream {
    // Parse the input tokens into a syntax tree
    let ast = parse_macro_input!(input as DeriveInput);

    // Get the struct name we are annotating, along with any generics it carries.
    let struct_name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    let name = struct_name.to_string();

    // Use ::bappa_warehouse::element::Component which works both inside and outside the crate.
    // Inside the crate, this works because of `extern crate self as bappa_warehouse;` in lib.rs
    // Outside the crate, this naturally resolves to the bappa_warehouse dependency.
    TokenStream::from(quote! {
        impl #impl_generics ::bappa_warehouse::element::Component for #struct_name #type_generics #where_clause {
            fn name() -> &'static str {
                #name
            }
        }
    })
}
