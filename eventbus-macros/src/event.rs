use crate::utils::{apply_derives, ensure_required_fields};
use proc_macro::TokenStream;
use quote::quote;
use std::collections::{HashMap, HashSet};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Ident, Item, Result, Token, Type, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[event] 宏实现
/// - 仅支持具名字段变体：`Variant { .. }`
/// - 确保每个变体具备字段：`event_id: EventId`, `username: Username`
/// - 生成 `::eventbus_core::event::Event` 实现（event_id/username/event_type/is_noop）
/// - 变体可覆写：`#[event(event_type = "...", noop = true)]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = proc_macro2::TokenStream::from(attr);
        return syn::Error::new(attr.span(), "#[event] takes no arguments on the enum")
            .to_compile_error()
            .into();
    }
    let mut input = parse_macro_input!(item as Item);

    let enum_item = match &mut input {
        Item::Enum(e) => e,
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on enum types")
                .to_compile_error()
                .into();
        }
    };

    // 合并/追加默认派生：Debug, Clone, Serialize, Deserialize
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    apply_derives(&mut enum_item.attrs, required);

    let event_id_ty: Type = syn::parse_quote! { ::eventbus_core::event::EventId };
    let username_ty: Type = syn::parse_quote! { ::eventbus_core::event::Username };

    let mut variant_types: HashMap<String, syn::LitStr> = HashMap::new();
    let mut noop_variants: HashSet<String> = HashSet::new();

    for v in &mut enum_item.variants {
        let syn::Fields::Named(fields_named) = &mut v.fields else {
            return syn::Error::new(
                v.span(),
                "#[event] supports only named-field enum variants, e.g., Variant { x: T }",
            )
            .to_compile_error()
            .into();
        };
        ensure_required_fields(
            fields_named,
            &[("event_id", &event_id_ty), ("username", &username_ty)],
        );

        let mut retained_attrs = Vec::new();
        let mut seen_event_attr = false;
        for attr in v.attrs.iter() {
            if !attr.path().is_ident("event") {
                retained_attrs.push(attr.clone());
                continue;
            }
            if seen_event_attr {
                return syn::Error::new(attr.span(), "duplicate #[event(...)] on this variant")
                    .to_compile_error()
                    .into();
            }
            seen_event_attr = true;

            match parse_variant_event_attr(attr) {
                Ok(vc) => {
                    if let Some(lit) = vc.ty {
                        variant_types.insert(v.ident.to_string(), lit);
                    }
                    if vc.noop {
                        noop_variants.insert(v.ident.to_string());
                    }
                }
                Err(err) => return err.to_compile_error().into(),
            }
        }
        v.attrs = retained_attrs;
    }

    let enum_ident = &enum_item.ident;
    let (impl_generics, ty_generics, where_clause) = enum_item.generics.split_for_impl();

    let id_match_arms = enum_item.variants.iter().map(|v| {
        let v_ident = &v.ident;
        quote! { Self::#v_ident { event_id, .. } => event_id }
    });

    let username_match_arms = enum_item.variants.iter().map(|v| {
        let v_ident = &v.ident;
        quote! { Self::#v_ident { username, .. } => username }
    });

    // 默认事件类型为变体名
    let type_match_arms = enum_item.variants.iter().map(|v| {
        let v_ident = &v.ident;
        let lit = variant_types
            .get(&v_ident.to_string())
            .cloned()
            .unwrap_or_else(|| syn::LitStr::new(&v_ident.to_string(), v_ident.span()));
        quote! { Self::#v_ident { .. } => #lit }
    });

    let noop_match_arms = enum_item.variants.iter().map(|v| {
        let v_ident = &v.ident;
        let noop = noop_variants.contains(&v_ident.to_string());
        quote! { Self::#v_ident { .. } => #noop }
    });

    let out = quote! {
        #enum_item

        impl #impl_generics ::eventbus_core::event::Event for #enum_ident #ty_generics #where_clause {
            fn event_id(&self) -> &::eventbus_core::event::EventId { match self { #( #id_match_arms, )* } }
            fn username(&self) -> &::eventbus_core::event::Username { match self { #( #username_match_arms, )* } }
            fn event_type(&self) -> &str { match self { #( #type_match_arms, )* } }
            fn is_noop(&self) -> bool { match self { #( #noop_match_arms, )* } }
        }
    };

    TokenStream::from(out)
}

// -------- parsing --------

struct VariantEventAttrConfig {
    ty: Option<syn::LitStr>,
    noop: bool,
}

fn parse_variant_event_attr(attr: &syn::Attribute) -> Result<VariantEventAttrConfig> {
    let syn::Meta::List(_) = &attr.meta else {
        return Err(syn::Error::new(attr.meta.span(), "expected #[event(...)]"));
    };

    let mut ty: Option<syn::LitStr> = None;
    let mut noop: Option<bool> = None;
    let pairs: Punctuated<VariantEventAttrKv, Token![,]> =
        attr.parse_args_with(Punctuated::<VariantEventAttrKv, Token![,]>::parse_terminated)?;

    for kv in pairs {
        match kv.key.to_string().as_str() {
            "event_type" => {
                if ty.is_some() {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        "duplicate key 'event_type' in attribute",
                    ));
                }
                let Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(lit),
                    ..
                }) = kv.value
                else {
                    return Err(syn::Error::new(
                        kv.value.span(),
                        "expected string literal for 'event_type'",
                    ));
                };
                ty = Some(lit);
            }
            "noop" => {
                if noop.is_some() {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        "duplicate key 'noop' in attribute",
                    ));
                }
                let Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Bool(lit),
                    ..
                }) = kv.value
                else {
                    return Err(syn::Error::new(
                        kv.value.span(),
                        "expected boolean literal for 'noop'",
                    ));
                };
                noop = Some(lit.value);
            }
            _ => {
                return Err(syn::Error::new(
                    kv.key.span(),
                    "unknown key; expected 'event_type' | 'noop'",
                ));
            }
        }
    }

    Ok(VariantEventAttrConfig {
        ty,
        noop: noop.unwrap_or(false),
    })
}

struct VariantEventAttrKv {
    key: Ident,
    #[allow(dead_code)]
    eq: Token![=],
    value: Expr,
}

impl Parse for VariantEventAttrKv {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            key: input.parse()?,
            eq: input.parse()?,
            value: input.parse()?,
        })
    }
}
