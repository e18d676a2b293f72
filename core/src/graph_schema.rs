//! Node labels and relationship types written by the loader.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    Person,
    Merchant,
    Device,
    Ip,
    Card,
    Address,
    Transaction,
}

impl NodeLabel {
    /// Load order of the entity phase. Transactions come last, in their
    /// own phase.
    pub const ENTITIES: [NodeLabel; 6] = [
        NodeLabel::Person,
        NodeLabel::Merchant,
        NodeLabel::Device,
        NodeLabel::Ip,
        NodeLabel::Card,
        NodeLabel::Address,
    ];

    pub const ALL: [NodeLabel; 7] = [
        NodeLabel::Person,
        NodeLabel::Merchant,
        NodeLabel::Device,
        NodeLabel::Ip,
        NodeLabel::Card,
        NodeLabel::Address,
        NodeLabel::Transaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Merchant => "Merchant",
            Self::Device => "Device",
            Self::Ip => "IP",
            Self::Card => "Card",
            Self::Address => "Address",
            Self::Transaction => "Transaction",
        }
    }

    /// Property that holds the unique key.
    pub fn key_property(&self) -> &'static str {
        match self {
            Self::Person => "person_id",
            Self::Merchant => "merchant_id",
            Self::Device => "device_id",
            Self::Ip => "ip",
            Self::Card => "card_hash",
            Self::Address => "address_hash",
            Self::Transaction => "tx_id",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelType {
    /// Person -> Transaction
    Made,
    ToMerchant,
    UsedDevice,
    FromIp,
    PaidWith,
    BilledTo,
}

impl RelType {
    pub const ALL: [RelType; 6] = [
        RelType::Made,
        RelType::ToMerchant,
        RelType::UsedDevice,
        RelType::FromIp,
        RelType::PaidWith,
        RelType::BilledTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Made => "MADE",
            Self::ToMerchant => "TO_MERCHANT",
            Self::UsedDevice => "USED_DEVICE",
            Self::FromIp => "FROM_IP",
            Self::PaidWith => "PAID_WITH",
            Self::BilledTo => "BILLED_TO",
        }
    }

    /// The node at the far end from the Transaction.
    pub fn counterpart(&self) -> NodeLabel {
        match self {
            Self::Made => NodeLabel::Person,
            Self::ToMerchant => NodeLabel::Merchant,
            Self::UsedDevice => NodeLabel::Device,
            Self::FromIp => NodeLabel::Ip,
            Self::PaidWith => NodeLabel::Card,
            Self::BilledTo => NodeLabel::Address,
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
