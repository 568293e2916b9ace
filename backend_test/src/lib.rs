use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::MemoryStore`, `crate::ledger::MemoryLedger` and
/// `crate::store::MongoStore`. The first three share state: votes submitted
/// through the client land in the injected ledger, and voters registered in
/// the injected store are visible to the client.
///
/// A `MongoStore` gets a fresh database named after the test, dropped however
/// the test ends. Such tests need a MongoDB server at `db_uri` and are ignored
/// unless the `mongo-tests` feature is enabled.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        let args = TokenStream2::from(args);
        return syn::Error::new(args.span(), "`backend_test` takes no arguments")
            .into_compile_error()
            .into();
    }

    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the injection list and reject invalid function signatures.
    let injections = match check_sig(item_fn.sig.clone()) {
        Ok(injections) => injections,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Only launch Rocket if the test asks for a client.
    let maybe_client = if injections.contains(&Injection::Client) {
        quote! {
            let rocket = crate::rocket_with_backends(
                crate::test_figment(),
                std::sync::Arc::new(store.clone()),
                std::sync::Arc::new(ledger.clone()),
            );
            let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                .await
                .unwrap();
        }
    } else {
        quote! {}
    };
    let test_args = injections.iter().map(Injection::arg).collect::<Vec<_>>();

    // Give database tests their own database, and drop it afterwards.
    let uses_mongo = injections.contains(&Injection::Mongo);
    let (maybe_ignore, maybe_mongo, run_test) = if uses_mongo {
        (
            quote! {
                #[cfg_attr(
                    not(feature = "mongo-tests"),
                    ignore = "needs a MongoDB server; enable the `mongo-tests` feature"
                )]
            },
            quote! {
                let (mongo_store, mongo_db) = crate::test_mongo_store(stringify!(#name)).await;
            },
            quote! {
                // Catch panics so the database is dropped regardless.
                let result = rocket::futures::FutureExt::catch_unwind(
                    std::panic::AssertUnwindSafe(#new_name(#(#test_args),*)),
                )
                .await;
                mongo_db.drop(None).await.unwrap();
                if let Err(cause) = result {
                    std::panic::resume_unwind(cause);
                }
            },
        )
    } else {
        (
            quote! {},
            quote! {},
            quote! { #new_name(#(#test_args),*).await; },
        )
    };

    // Rewrite the test function.
    quote! {
        #[test]
        #maybe_ignore
        fn #name() {
            /// The test itself.
            #item_fn

            log4rs_test_utils::test_logging::init_logging_once_for(
                ["chainballot_backend", "chainballot_protocol"],
                None,
                None,
            );

            // Multiple workers, so that concurrency tests genuinely race.
            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("backend-test-worker")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async move {
                let store = crate::store::MemoryStore::default();
                let ledger = crate::ledger::MemoryLedger::default();
                let _ = (&store, &ledger);
                #maybe_client
                #maybe_mongo
                #run_test
            });
        }
    }
    .into()
}

/// Something the test function asks to have injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injection {
    Client,
    Store,
    Ledger,
    Mongo,
}

impl Injection {
    fn arg(&self) -> TokenStream2 {
        match self {
            Injection::Client => quote! { rocket_client },
            Injection::Store => quote! { store.clone() },
            Injection::Ledger => quote! { ledger.clone() },
            Injection::Mongo => quote! { mongo_store.clone() },
        }
    }
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<Injection>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut injections = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    // Valid as the last path segment for any type is itself
                    let type_ident: &Ident = &type_path.path.segments.last().unwrap().ident;
                    let injection = if type_ident == "Client" {
                        Some(Injection::Client)
                    } else if type_ident == "MemoryStore" {
                        Some(Injection::Store)
                    } else if type_ident == "MemoryLedger" {
                        Some(Injection::Ledger)
                    } else if type_ident == "MongoStore" {
                        Some(Injection::Mongo)
                    } else {
                        None
                    };
                    if let Some(injection) = injection {
                        if injections.contains(&injection) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        injections.push(injection);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `store_ident: MemoryStore`, `ledger_ident: MemoryLedger` or `store_ident: MongoStore`",
        ));
    }

    Ok(injections)
}
