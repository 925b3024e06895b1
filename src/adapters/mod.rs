//! Concrete `SourceAdapter` implementations, one per `(dataSource,
//! metricName)` pair (spec.md §2).

pub mod bank_provision;
pub mod bdc_discount;
pub mod bond_issuance;
pub mod credit_fund;

pub use bank_provision::BankProvisionAdapter;
pub use bdc_discount::BdcDiscountAdapter;
pub use bond_issuance::BondIssuanceAdapter;
pub use credit_fund::CreditFundAdapter;
