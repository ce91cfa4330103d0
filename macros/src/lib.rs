use proc_macro::{self, TokenStream};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, Meta, NestedMeta};

///
/// A derive macro which implements `SynapseFields` for a payload struct.
///
/// The generated impl carries the payload's wire name, a policy table with
/// one entry per field, and a `merge_from_peer` that copies only the fields
/// the table marks as mutable on receive.
///
/// usage:
/// ```rust,ignore
/// #[derive(SynapseFields)]
/// struct Dummy {
///     #[synapse(frozen)]
///     input: u64,
///     output: Option<u64>,
/// }
/// ```
///
/// `#[synapse(frozen)]` on the struct itself freezes every field.
///
#[proc_macro_derive(SynapseFields, attributes(synapse))]
pub fn synapse_fields(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        attrs,
        data,
        generics,
        ..
    } = parse_macro_input!(input);
    let struct_is_frozen = has_frozen_attr(&attrs);

    // collect (field, frozen) pairs in declaration order
    let fields: Vec<(Ident, bool)> = match data {
        Data::Struct(data) => match data.fields {
            Fields::Named(named) => named
                .named
                .into_iter()
                .filter_map(|field| {
                    let frozen = struct_is_frozen || has_frozen_attr(&field.attrs);
                    field.ident.map(|ident| (ident, frozen))
                })
                .collect(),
            Fields::Unit => vec![],
            Fields::Unnamed(_) => panic!("SynapseFields only works on structs with named fields"),
        },
        _ => panic!("SynapseFields only works on structs"),
    };

    let policies = fields.iter().map(|(field, frozen)| {
        let name = field.to_string();
        let mutable_on_receive = !frozen;
        quote! {
            ::synapse_rpc::synapse::FieldPolicy {
                name: #name,
                mutable_on_receive: #mutable_on_receive,
            }
        }
    });
    let copies = fields
        .iter()
        .filter(|(_, frozen)| !frozen)
        .map(|(field, _)| {
            let name = field.to_string();
            quote! {
                self.#field = peer.#field;
                copied.push(#name);
            }
        });

    let type_name = ident.to_string();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let output = quote! {
        impl #impl_generics ::synapse_rpc::synapse::SynapseFields for #ident #ty_generics #where_clause {
            const NAME: &'static str = #type_name;
            const FIELDS: &'static [::synapse_rpc::synapse::FieldPolicy] = &[#(#policies),*];

            #[allow(unused_variables, unused_mut)]
            fn merge_from_peer(&mut self, peer: Self) -> Vec<&'static str> {
                let mut copied = Vec::new();
                #(#copies)*
                copied
            }
        }
    };
    output.into()
}

// true if the attribute list contains #[synapse(frozen)]
fn has_frozen_attr(attrs: &[Attribute]) -> bool {
    attrs
        .iter()
        .filter(|attr| attr.path.is_ident("synapse"))
        .any(|attr| match attr.parse_meta() {
            Ok(Meta::List(list)) => list.nested.iter().any(|nested| match nested {
                NestedMeta::Meta(Meta::Path(path)) => path.is_ident("frozen"),
                _ => false,
            }),
            _ => false,
        })
}
