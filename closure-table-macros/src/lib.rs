use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Type};

/// Implements `closure_table::TreeNode` for a SeaORM `Model`.
///
/// ```ignore
/// #[derive(Clone, Debug, DeriveEntityModel, TreeNode)]
/// #[sea_orm(table_name = "tasks")]
/// #[closure_tree(kind = "Task", parent_type_field = "parent_type", name_field = "name")]
/// pub struct Model { ... }
/// ```
#[proc_macro_derive(TreeNode, attributes(closure_tree))]
pub fn derive_tree_node(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_tree_node(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    kind: Option<String>,
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    parent_type_field: Option<String>,
    name_field: Option<String>,
    order_field: Option<String>,
}

fn impl_tree_node(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "TreeNode can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("closure_tree") {
            parse_closure_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let table_name = table_name.ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            "TreeNode requires #[sea_orm(table_name = \"...\")]",
        )
    })?;

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let parent_field_name = options
        .parent_field
        .unwrap_or_else(|| "parent_id".to_string());
    let kind = options
        .kind
        .unwrap_or_else(|| to_pascal_case(&table_name));

    let Fields::Named(ref fields) = data_struct.fields else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "TreeNode requires named fields",
        ));
    };

    let has_field = |name: &str| {
        fields
            .named
            .iter()
            .any(|field| field.ident.as_ref().is_some_and(|ident| ident == name))
    };
    for name in [Some(&id_field_name), Some(&parent_field_name)]
        .into_iter()
        .chain([
            options.parent_type_field.as_ref(),
            options.name_field.as_ref(),
            options.order_field.as_ref(),
        ])
        .flatten()
    {
        if !has_field(name.as_str()) {
            return Err(syn::Error::new(
                struct_ident.span(),
                format!("TreeNode: no field named `{name}`"),
            ));
        }
    }

    let id_type = match options.id_type {
        Some(ty) => ty,
        None => fields
            .named
            .iter()
            .find(|field| field.ident.as_ref().is_some_and(|ident| ident == &id_field_name))
            .map(|field| field.ty.clone())
            .ok_or_else(|| {
                syn::Error::new(
                    struct_ident.span(),
                    "Unable to determine id field type; specify `id_type = ...` in #[closure_tree]",
                )
            })?,
    };

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let parent_field_ident = Ident::new(&parent_field_name, struct_ident.span());
    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));

    let parent_type_setup = options.parent_type_field.as_ref().map(|column| {
        quote! { .parent_type_column(#column) }
    });
    let name_setup = options.name_field.as_ref().map(|column| {
        quote! { .name_column(#column) }
    });
    let order_setup = options.order_field.as_ref().map(|column| {
        quote! { .order(::closure_table::OrderStrategy::numeric_column(#column)) }
    });

    let parent_ref_body = match &options.parent_type_field {
        Some(field) => {
            let parent_type_ident = Ident::new(field, struct_ident.span());
            quote! {
                match (&self.#parent_field_ident, &self.#parent_type_ident) {
                    (Some(id), Some(kind)) => {
                        Some(::closure_table::NodeRef::new(kind.clone(), id.clone()))
                    }
                    _ => None,
                }
            }
        }
        None => quote! {
            self.#parent_field_ident
                .clone()
                .map(|id| ::closure_table::NodeRef::new(Self::KIND, id))
        },
    };

    let generated = quote! {
        impl ::closure_table::TreeNode for #struct_ident {
            type Entity = Entity;
            type Id = #id_type;

            const KIND: &'static str = #kind;

            fn node_kind() -> ::closure_table::NodeKind {
                ::closure_table::NodeKind::new(#kind, #table_name)
                    .id_column(#id_field_name)
                    .parent_column(#parent_field_name)
                    #parent_type_setup
                    #name_setup
                    #order_setup
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn node_id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_ref(&self) -> Option<::closure_table::NodeRef<Self::Id>> {
                #parent_ref_body
            }
        }
    };

    Ok(generated.into())
}

fn parse_closure_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "id_type" {
            let ty: Type = meta.value()?.parse()?;
            options.id_type = Some(ty);
            return Ok(());
        }

        let slot = match ident.as_str() {
            "kind" => &mut options.kind,
            "id_field" => &mut options.id_field,
            "parent_field" => &mut options.parent_field,
            "parent_type_field" => &mut options.parent_type_field,
            "name_field" => &mut options.name_field,
            "order_field" => &mut options.order_field,
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported closure_tree option `{other}`"),
                ));
            }
        };
        let value: syn::LitStr = meta.value()?.parse()?;
        *slot = Some(value.value());

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Other key-value options such as `schema_name`.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
