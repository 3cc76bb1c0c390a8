use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub i64);

/// Catalog classification. Quote sections are grouped by this type, one
/// section per type actually present on the quote, named after the label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Equipment,
    Consumable,
    Service,
    Accessory,
    SpareParts,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Equipment => "EQU",
            ProductType::Consumable => "CON",
            ProductType::Service => "SER",
            ProductType::Accessory => "ACC",
            ProductType::SpareParts => "REF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EQU" => Some(ProductType::Equipment),
            "CON" => Some(ProductType::Consumable),
            "SER" => Some(ProductType::Service),
            "ACC" => Some(ProductType::Accessory),
            "REF" => Some(ProductType::SpareParts),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProductType::Equipment => "Equipment",
            ProductType::Consumable => "Consumable",
            ProductType::Service => "Service",
            ProductType::Accessory => "Accessory",
            ProductType::SpareParts => "Spare parts",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub price_editable: bool,
    pub product_type: ProductType,
    pub is_active: bool,
}
