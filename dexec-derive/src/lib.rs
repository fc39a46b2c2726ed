/// Implements `code()` and `from_code()` for a fieldless `#[repr(uN)]` enum.
///
/// The codes are the explicit discriminants of the variants, so they can be written to a pipe or
/// used as an exit status and mapped back on the other side.
#[proc_macro_derive(StatusCode)]
pub fn derive_status_code(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    derive_status_code_impl(syn::parse_macro_input!(input as syn::DeriveInput)).into()
}

fn compile_error(span: &impl syn::spanned::Spanned, message: &str) -> proc_macro2::TokenStream {
    syn::Error::new(span.span(), message).to_compile_error()
}

fn derive_status_code_impl(input: syn::DeriveInput) -> proc_macro2::TokenStream {
    let ident = input.ident.clone();

    let data = if let syn::Data::Enum(data) = input.data.clone() {
        data
    } else {
        return compile_error(&input, "StatusCode can only be derived for enums");
    };

    if let Some(variant) = data
        .variants
        .iter()
        .find(|v| !matches!(v.fields, syn::Fields::Unit))
    {
        return compile_error(variant, "StatusCode variants cannot carry fields");
    }

    let repr = match input.attrs.iter().find(|attr| attr.path.is_ident("repr")) {
        Some(attr) => match attr.parse_args::<syn::Path>() {
            Ok(repr) => repr,
            Err(err) => return err.to_compile_error(),
        },
        None => {
            return compile_error(&input, "Cannot derive an enum that is not `repr(_num_)`");
        }
    };

    let variants = data
        .variants
        .iter()
        .map(|v| v.ident.clone())
        .collect::<Vec<_>>();

    quote::quote! {
        impl #ident {
            #[must_use]
            pub fn code(self) -> #repr {
                self as #repr
            }

            #[must_use]
            pub fn from_code(code: #repr) -> Option<Self> {
                #(if Self::#variants as #repr == code { return Some(Self::#variants); })*
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success() {
        let input = quote::quote! {
            #[repr(u8)]
            enum S {
                One = 1,
                Two = 2,
            }
        };

        let expected = quote::quote! {
            impl S {
                #[must_use]
                pub fn code(self) -> u8 {
                    self as u8
                }

                #[must_use]
                pub fn from_code(code: u8) -> Option<Self> {
                    if Self::One as u8 == code { return Some(Self::One); }
                    if Self::Two as u8 == code { return Some(Self::Two); }
                    None
                }
            }
        };

        assert_eq!(
            derive_status_code_impl(syn::parse2(input).unwrap()).to_string(),
            expected.to_string()
        );
    }

    #[test]
    fn non_enum() {
        let input = quote::quote! {
            struct S {
                string: String,
            }
        };

        assert_eq!(
            derive_status_code_impl(syn::parse2::<syn::DeriveInput>(input).unwrap()).to_string(),
            "compile_error ! { \"StatusCode can only be derived for enums\" }"
        );
    }

    #[test]
    fn non_num_enum() {
        let input = quote::quote! {
            enum S {
               String,
            }
        };

        assert_eq!(
            derive_status_code_impl(syn::parse2::<syn::DeriveInput>(input).unwrap()).to_string(),
            "compile_error ! { \"Cannot derive an enum that is not `repr(_num_)`\" }"
        );
    }

    #[test]
    fn variant_with_fields() {
        let input = quote::quote! {
            #[repr(u8)]
            enum S {
               Unit = 1,
               Tuple(i32),
            }
        };

        assert_eq!(
            derive_status_code_impl(syn::parse2::<syn::DeriveInput>(input).unwrap()).to_string(),
            "compile_error ! { \"StatusCode variants cannot carry fields\" }"
        );
    }
}
