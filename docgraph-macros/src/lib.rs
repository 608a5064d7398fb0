//! Procedural macros for the docgraph project.
//!
//! `#[derive(Entity)]` generates the `Entity` implementation of a struct with named
//! fields, including its declarative field schema.
//!
//! Struct attributes:
//!
//! - `#[entity(collection = "name")]` - collection name, defaults to the lowercased type name
//! - `#[entity(after_wake_up = "path")]` - `fn(&mut Self)` run after an entity is rebuilt
//!   from a stored document
//!
//! Field attributes:
//!
//! - `#[entity(id)]` - the `Option<String>` identity field, required exactly once. It may
//!   have any name; the stored identity is bound to it on wake-up
//! - `#[entity(skip)]` - leave the field out of serialized documents
//! - `#[entity(compute = "path")]` - `fn(&Self) -> T` used when the field value is absent
//!
//! Every other field takes part in serialization in declaration order and must implement
//! `ToFieldValue`.

#[allow(unused_extern_crates)]
extern crate self as docgraph_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DataStruct, DeriveInput, Error, Fields, LitStr, Path, ext::IdentExt, parse_macro_input,
};

#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_entity(input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut collection: Option<LitStr> = None;
    let mut after_wake_up: Option<Path> = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                collection = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("after_wake_up") {
                let path: LitStr = meta.value()?.parse()?;
                after_wake_up = Some(path.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute"))
            }
        })?;
    }

    let collection = collection
        .map(|name| name.value())
        .unwrap_or_else(|| ident.unraw().to_string().to_lowercase());
    let type_name = ident.unraw().to_string();

    let fields = match &input.data {
        Data::Struct(DataStruct { fields: Fields::Named(named), .. }) => &named.named,
        _ => {
            return Err(Error::new_spanned(
                ident,
                "#[derive(Entity)] requires a struct with named fields",
            ));
        }
    };

    let mut id_field = None;
    let mut declarations = Vec::with_capacity(fields.len());

    for field in fields {
        let Some(name) = &field.ident else {
            continue;
        };

        let mut is_id = false;
        let mut skip = false;
        let mut compute: Option<Path> = None;

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    is_id = true;
                    Ok(())
                } else if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else if meta.path.is_ident("compute") {
                    let path: LitStr = meta.value()?.parse()?;
                    compute = Some(path.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported entity field attribute"))
                }
            })?;
        }

        if is_id {
            if id_field.is_some() {
                return Err(Error::new_spanned(
                    field,
                    "only one field may be marked #[entity(id)]",
                ));
            }
            id_field = Some(name.clone());
            continue;
        }

        let key = name.unraw().to_string();
        let read = quote! {
            |e: &#ident #ty_generics| ::docgraph::entity::ToFieldValue::to_field_value(&e.#name)
        };

        let mut declaration = match compute {
            Some(path) => quote! {
                .computed(
                    #key,
                    #read,
                    |e: &#ident #ty_generics| ::docgraph::entity::ToFieldValue::to_field_value(&#path(e)),
                )
            },
            None => quote! { .field(#key, #read) },
        };

        if skip {
            declaration.extend(quote! { .skip_on_serialize() });
        }

        declarations.push(declaration);
    }

    let id_field = id_field.ok_or_else(|| {
        Error::new_spanned(
            ident,
            "#[derive(Entity)] requires one Option<String> field marked #[entity(id)]",
        )
    })?;

    let identity_field = id_field.unraw().to_string();

    let wake_up = after_wake_up.map(|path| {
        quote! {
            fn wake_up(
                document: ::docgraph::bson::Document,
            ) -> ::docgraph::error::DocumentStoreResult<Self> {
                let mut entity: Self = ::docgraph::decode::bind_entity(
                    ::docgraph::decode::decode_store_document(document)?,
                )?;
                #path(&mut entity);
                Ok(entity)
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::docgraph::entity::Entity for #ident #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #type_name;

            const IDENTITY_FIELD: &'static str = #identity_field;

            fn collection_name() -> &'static str {
                #collection
            }

            fn id(&self) -> ::std::option::Option<&str> {
                self.#id_field.as_deref()
            }

            fn set_id(&mut self, id: ::std::string::String) {
                self.#id_field = ::std::option::Option::Some(id);
            }

            fn schema() -> ::docgraph::entity::Schema<Self> {
                ::docgraph::entity::Schema::new()
                    #(#declarations)*
            }

            #wake_up
        }
    })
}
