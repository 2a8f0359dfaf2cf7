//! Reference data: address lookups, brands and the product catalog.
//!
//! These operations are public and cached under [`CachePolicy::StaticRetain`],
//! so the lists survive sign-in, refresh and sign-out. The arguments that
//! select each entry are fixed here because address forms rely on them.

use serde::{Deserialize, Serialize};

use crate::cache::{CachePolicy, PolicyRule};
use crate::operation::TypedOperation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Province {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct District {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub province_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ward {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub district_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub stock: Option<u32>,
}

/// One page of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    #[serde(default)]
    pub items: Vec<Product>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictsVars {
    pub province_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WardsVars {
    pub district_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsVars {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

pub struct GetProvinces;

impl TypedOperation for GetProvinces {
    const NAME: &'static str = "getProvinces";
    const ROOT_FIELD: &'static str = "provinces";
    const REQUIRES_AUTH: bool = false;
    type Variables = ();
    type Output = Vec<Province>;

    fn document() -> Option<&'static str> {
        Some("query getProvinces { provinces { id name code } }")
    }
}

pub struct GetDistricts;

impl TypedOperation for GetDistricts {
    const NAME: &'static str = "getDistricts";
    const ROOT_FIELD: &'static str = "districts";
    const REQUIRES_AUTH: bool = false;
    type Variables = DistrictsVars;
    type Output = Vec<District>;

    fn document() -> Option<&'static str> {
        Some(
            "query getDistricts($provinceId: ID!) { \
             districts(provinceId: $provinceId) { id name provinceId } }",
        )
    }
}

pub struct GetWards;

impl TypedOperation for GetWards {
    const NAME: &'static str = "getWards";
    const ROOT_FIELD: &'static str = "wards";
    const REQUIRES_AUTH: bool = false;
    type Variables = WardsVars;
    type Output = Vec<Ward>;

    fn document() -> Option<&'static str> {
        Some(
            "query getWards($districtId: ID!) { \
             wards(districtId: $districtId) { id name districtId } }",
        )
    }
}

pub struct GetBrands;

impl TypedOperation for GetBrands {
    const NAME: &'static str = "getBrands";
    const ROOT_FIELD: &'static str = "brands";
    const REQUIRES_AUTH: bool = false;
    type Variables = ();
    type Output = Vec<Brand>;

    fn document() -> Option<&'static str> {
        Some("query getBrands { brands { id name slug logo } }")
    }
}

pub struct GetProducts;

impl TypedOperation for GetProducts {
    const NAME: &'static str = "getProducts";
    const ROOT_FIELD: &'static str = "products";
    const REQUIRES_AUTH: bool = false;
    type Variables = ProductsVars;
    type Output = ProductPage;

    fn document() -> Option<&'static str> {
        Some(
            "query getProducts($categoryId: ID, $page: Int) { \
             products(categoryId: $categoryId, page: $page) { \
             items { id name price salePrice thumbnail brandId categoryId stock } total page } }",
        )
    }
}

/// Built-in cache rules for the reference operations.
pub fn default_policies() -> Vec<(&'static str, PolicyRule)> {
    let retain = || PolicyRule::new(CachePolicy::StaticRetain);
    vec![
        (GetProvinces::NAME, retain()),
        (GetDistricts::NAME, retain().keyed_on(["provinceId"])),
        (GetWards::NAME, retain().keyed_on(["districtId"])),
        (GetBrands::NAME, retain()),
        (GetProducts::NAME, retain().keyed_on(["categoryId", "page"])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PolicyRegistry;
    use crate::operation::{Operation, decode_root};
    use serde_json::json;

    #[test]
    fn test_reference_operations_are_public() {
        let op = Operation::from_typed::<GetDistricts>(&DistrictsVars {
            province_id: "79".into(),
        })
        .unwrap();
        assert!(!op.context.requires_auth);
        assert!(op.document.is_some());
        assert_eq!(op.variables["provinceId"], json!("79"));
    }

    #[test]
    fn test_district_cache_key() {
        let registry = PolicyRegistry::with_reference_defaults();
        let op = Operation::from_typed::<GetDistricts>(&DistrictsVars {
            province_id: "79".into(),
        })
        .unwrap();
        let plan = registry.plan(&op).unwrap();
        assert_eq!(plan.key.as_str(), r#"getDistricts({"provinceId":"79"})"#);
        assert_eq!(plan.policy, CachePolicy::StaticRetain);
    }

    #[test]
    fn test_product_pages_are_separate_entries() {
        let registry = PolicyRegistry::with_reference_defaults();
        let page = |n| {
            Operation::from_typed::<GetProducts>(&ProductsVars {
                category_id: Some("phones".into()),
                page: Some(n),
            })
            .unwrap()
        };
        let k1 = registry.plan(&page(1)).unwrap().key;
        let k2 = registry.plan(&page(2)).unwrap().key;
        assert_ne!(k1, k2);

        let all = Operation::from_typed::<GetProducts>(&ProductsVars::default()).unwrap();
        assert_eq!(registry.plan(&all).unwrap().key.as_str(), "getProducts");
    }

    #[test]
    fn test_decode_provinces() {
        let data = json!({"provinces": [
            {"id": "01", "name": "Ha Noi", "code": "HN"},
            {"id": "79", "name": "Ho Chi Minh"}
        ]});
        let provinces = decode_root::<GetProvinces>(&data).unwrap();
        assert_eq!(provinces.len(), 2);
        assert_eq!(provinces[1].code, None);
    }

    #[test]
    fn test_decode_product_page() {
        let data = json!({"products": {
            "items": [{"id": "p1", "name": "Phone", "price": 199.0, "salePrice": 149.0}],
            "total": 1,
            "page": 1
        }});
        let page = decode_root::<GetProducts>(&data).unwrap();
        assert_eq!(page.items[0].sale_price, Some(149.0));
        assert_eq!(page.total, Some(1));
    }
}
