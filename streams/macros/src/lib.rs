mod event;

use proc_macro::TokenStream;

/// Derive `rusty_streams::Event`.
///
/// Without attributes the type is its own payload (`type Arg = Self`). A tag type can name a
/// different payload with `#[event(arg = Type)]`.
#[proc_macro_derive(Event, attributes(event))]
pub fn derive_event(item: TokenStream) -> TokenStream {
    event::derive_event(item)
}
