use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Ident, ItemFn, LitStr};

/// Proc macro to denote a Transaction
///
/// The function must return a `Result<T, E>`; an `Err` counts as a failed request. Each call
/// is timed into `http_req_duration` (tagged `name:<transaction>`) and `<transaction>_duration`,
/// and waits on the run's rate limit if one is set. The transaction name defaults to the
/// function name and can be given explicitly.
///
/// Thresholds may name `<transaction>_duration` without declaring it with `declare_metric`;
/// it is registered as a trend when the run starts.
///
/// # Example
/// ```ignore
/// use volley::prelude::*;
///
/// #[transaction]
/// async fn create_user(client: &reqwest::Client, url: &str) -> Result<u16, reqwest::Error> {
///     ...
/// }
///
/// #[transaction("lookup")]
/// async fn get_user(client: &reqwest::Client, url: &str) -> Result<u16, reqwest::Error> {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn transaction(attr: TokenStream, item: TokenStream) -> TokenStream {
    transaction_internal(attr, item).into()
}

fn transaction_internal(attr: TokenStream, item: TokenStream) -> TokenStream2 {
    let input = syn::parse::<ItemFn>(item).expect("Macro only works on fn() items");

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;
    let stmts = &block.stmts;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "#[transaction] requires an async fn")
            .to_compile_error();
    }

    let name = if attr.is_empty() {
        LitStr::new(&sig.ident.to_string(), Span::call_site())
    } else {
        match syn::parse::<LitStr>(attr) {
            Ok(name) => name,
            Err(err) => return err.to_compile_error(),
        }
    };

    quote! {
        #(#attrs)* #vis #sig {
            ::volley::transaction::transaction_hook(
                ::volley::core::generate_labels!(#name),
                async move {
                    #(#stmts)*
                },
            ).await
        }
    }
}

/// Proc macro to denote a Scenario
///
/// NOTE: The function must take no arguments. Values such as the target URL are read inside
/// the function or captured by building a [`Scenario`] from a closure instead.
///
/// The function may return `()`, a `Duration` think time to sleep before the next iteration,
/// or a `Result` of either; an `Err` or a panic counts as a failed iteration.
///
/// See the `Scenario` struct for more information on the methods this macro provides on functions.
///
/// # Example
/// ```ignore
/// use volley::prelude::*;
/// use std::time::Duration;
///
/// #[scenario]
/// async fn my_scenario() -> Duration {
///     Duration::from_secs(1)
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr, item).into()
}

fn scenario_internal(_attr: TokenStream, item: TokenStream) -> TokenStream2 {
    let input = syn::parse::<ItemFn>(item).expect("Macro only works on fn() items");

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;
    let stmts = &block.stmts;

    if !sig.inputs.is_empty() {
        return syn::Error::new_spanned(&sig.inputs, "#[scenario] functions take no arguments")
            .to_compile_error();
    }

    let new_name = Ident::new(&format!("__volley_{}", sig.ident), Span::call_site());
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    let mut scen_sig = sig.clone();
    let scen_name = sig.ident.clone();
    scen_sig.asyncness = None;
    scen_sig.output = syn::parse(
        quote! {
            -> impl ::volley::scenario::ConfigurableScenario<
                ::std::result::Result<::volley::core::RunReport, ::volley::core::ConfigError>
            >
        }
        .into(),
    )
    .expect("Scenario signature is invalid");

    quote! {
        #(#attrs)* #vis #scen_sig {
            ::volley::scenario::Scenario::new(stringify!(#scen_name), #new_name)
        }

        #[doc(hidden)]
        #vis #new_sig {
            #(#stmts)*
        }
    }
}
