use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, LitStr, parse_macro_input};

/// Registers a strategy factory function under `name` with the
/// process-wide strategy registry (C9, §4.8). The annotated function must
/// match `relaycache::strategy::StrategyBuilder`'s signature; the macro
/// leaves it untouched and submits an `inventory` entry pointing at it.
#[proc_macro_attribute]
pub fn strategy(attr: TokenStream, item: TokenStream) -> TokenStream {
    let name = parse_macro_input!(attr as LitStr);
    let func = parse_macro_input!(item as ItemFn);
    let func_name = &func.sig.ident;

    let expanded = quote! {
        #func

        inventory::submit! {
            crate::strategy::StrategyFactory {
                name: #name,
                build: #func_name,
            }
        }
    };

    TokenStream::from(expanded)
}
