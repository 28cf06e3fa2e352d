//! `#[tap_test]` attribute for the sniffer's on-device test suite.
//!
//! Annotated functions are kept as ordinary functions and registered with
//! `sniffer_census_esp32::testing` through `inventory`, so the
//! `device-tests` binary can run them on the host, QEMU or a board.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Register a function as a TAP test.
///
/// The function either returns `()` (a panic fails it) or a `Result`
/// (`Err` fails it).
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "message fragment")]`
///
/// ```ignore
/// use sniffer_census_esp32_macros::tap_test;
///
/// #[tap_test]
/// fn empty_sweep_reports_zero() {
///     assert_eq!(SweepReport::from_raw(0, 0).devices, 0);
/// }
///
/// #[tap_test(should_panic = "index out of bounds")]
/// fn reads_past_end() {
///     let frame = [0u8; 4];
///     let _ = frame[10];
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let should_panic = match parse_should_panic(attr) {
        Ok(mode) => mode,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match should_panic {
        ShouldPanic::No if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        ShouldPanic::No => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        ShouldPanic::Yes => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        ShouldPanic::WithMessage(msg) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #input_fn

        ::sniffer_census_esp32::testing::inventory::submit! {
            ::sniffer_census_esp32::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::sniffer_census_esp32::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum ShouldPanic {
    No,
    Yes,
    WithMessage(String),
}

fn parse_should_panic(attr: TokenStream) -> syn::Result<ShouldPanic> {
    if attr.is_empty() {
        return Ok(ShouldPanic::No);
    }

    let meta: Meta = syn::parse(attr)?;
    if !meta.path().is_ident("should_panic") {
        return Err(syn::Error::new_spanned(
            meta.path(),
            "tap_test: supported attributes are `should_panic` and `should_panic = \"message\"`",
        ));
    }

    match meta {
        Meta::Path(_) => Ok(ShouldPanic::Yes),
        Meta::NameValue(nv) => match nv.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => Ok(ShouldPanic::WithMessage(s.value())),
            other => Err(syn::Error::new_spanned(
                other,
                "tap_test: should_panic expects a string literal",
            )),
        },
        Meta::List(list) => Err(syn::Error::new_spanned(
            list,
            "tap_test: use `should_panic = \"message\"`",
        )),
    }
}
