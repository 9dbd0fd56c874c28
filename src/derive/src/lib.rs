extern crate proc_macro;

use crate::proc_macro::TokenStream;

use quote::quote;

use syn::{parse_macro_input, DeriveInput};

/// Marks a struct as an event which can be put into a trace and emitted by simulation components.
#[proc_macro_derive(IsSimulationEvent)]
pub fn sim_event_derive(input: TokenStream) -> TokenStream {
  let input = parse_macro_input!(input as DeriveInput);
  let name = &input.ident;

  TokenStream::from(quote! {
    impl dslab_provreq::core::common::SimulationEvent for #name { }
  })
}
