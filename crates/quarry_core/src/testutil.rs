//! Shared fixtures for tests.
//!
//! The sample model has customers with orders, order lines with a composite
//! key, shipments referencing lines through a composite foreign key, and
//! addresses.

use std::sync::LazyLock;

use quarry_error::Result;

use crate::datatype::{DataType, DataTypeId};
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::{self, ExprRef};
use crate::functions::catalog::StaticFunctionCatalog;
use crate::functions::{DbFunctionDescriptor, DbFunctionSet, Signature};
use crate::model::{
    Cardinality,
    EntityTypeDescriptor,
    ForeignKeyColumn,
    Model,
    NavigationDescriptor,
    PropertyDescriptor,
};
use crate::operators::{ENUMERABLE, MethodRef, QUERYABLE, call_operator};

/// Owner of the sample catalog functions.
pub const DB_FUNCTIONS: &str = "DbFunctions";

static SAMPLE_MODEL: LazyLock<Model> = LazyLock::new(build_sample_model);

fn prop(name: &str, datatype: DataType, nullable: bool) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_string(),
        datatype,
        nullable,
    }
}

fn fk(pairs: &[(&str, &str)]) -> Vec<ForeignKeyColumn> {
    pairs
        .iter()
        .map(|(dependent, principal)| ForeignKeyColumn {
            dependent: dependent.to_string(),
            principal: principal.to_string(),
        })
        .collect()
}

fn nav(
    name: &str,
    target: &str,
    cardinality: Cardinality,
    required: bool,
    foreign_key: Vec<ForeignKeyColumn>,
    foreign_key_on_source: bool,
) -> NavigationDescriptor {
    NavigationDescriptor {
        name: name.to_string(),
        target: target.to_string(),
        cardinality,
        required,
        foreign_key,
        foreign_key_on_source,
    }
}

fn build_sample_model() -> Model {
    let customer = EntityTypeDescriptor {
        name: "Customer".to_string(),
        table: "customers".to_string(),
        schema: None,
        properties: vec![
            prop("Id", DataType::Int32, false),
            prop("Name", DataType::Utf8, false),
            prop("City", DataType::Utf8, true),
            prop("AddressId", DataType::Int32, true),
        ],
        key: vec!["Id".to_string()],
        navigations: vec![
            nav(
                "Orders",
                "Order",
                Cardinality::Many,
                false,
                fk(&[("CustomerId", "Id")]),
                false,
            ),
            nav(
                "Address",
                "Address",
                Cardinality::One,
                false,
                fk(&[("AddressId", "Id")]),
                true,
            ),
        ],
    };

    let order = EntityTypeDescriptor {
        name: "Order".to_string(),
        table: "orders".to_string(),
        schema: Some("sales".to_string()),
        properties: vec![
            prop("Id", DataType::Int32, false),
            prop("CustomerId", DataType::Int32, false),
            prop("Total", DataType::Float64, false),
            prop("Status", DataType::Utf8, true),
        ],
        key: vec!["Id".to_string()],
        navigations: vec![
            nav(
                "Customer",
                "Customer",
                Cardinality::One,
                true,
                fk(&[("CustomerId", "Id")]),
                true,
            ),
            nav(
                "Lines",
                "OrderLine",
                Cardinality::Many,
                false,
                fk(&[("OrderId", "Id")]),
                false,
            ),
        ],
    };

    let line = EntityTypeDescriptor {
        name: "OrderLine".to_string(),
        table: "order_lines".to_string(),
        schema: Some("sales".to_string()),
        properties: vec![
            prop("OrderId", DataType::Int32, false),
            prop("LineNo", DataType::Int32, false),
            prop("Sku", DataType::Utf8, false),
            prop("Quantity", DataType::Int32, false),
        ],
        key: vec!["OrderId".to_string(), "LineNo".to_string()],
        navigations: vec![nav(
            "Order",
            "Order",
            Cardinality::One,
            true,
            fk(&[("OrderId", "Id")]),
            true,
        )],
    };

    let shipment = EntityTypeDescriptor {
        name: "Shipment".to_string(),
        table: "shipments".to_string(),
        schema: None,
        properties: vec![
            prop("Id", DataType::Int32, false),
            prop("OrderId", DataType::Int32, true),
            prop("LineNo", DataType::Int32, true),
            prop("Carrier", DataType::Utf8, true),
        ],
        key: vec!["Id".to_string()],
        navigations: vec![nav(
            "Line",
            "OrderLine",
            Cardinality::One,
            false,
            fk(&[("OrderId", "OrderId"), ("LineNo", "LineNo")]),
            true,
        )],
    };

    let address = EntityTypeDescriptor {
        name: "Address".to_string(),
        table: "addresses".to_string(),
        schema: None,
        properties: vec![
            prop("Id", DataType::Int32, false),
            prop("Street", DataType::Utf8, false),
            prop("City", DataType::Utf8, false),
        ],
        key: vec!["Id".to_string()],
        navigations: Vec::new(),
    };

    // The fixture is static and known to be consistent.
    match Model::try_new([customer, order, line, shipment, address]) {
        Ok(model) => model,
        Err(e) => panic!("sample model is invalid: {e}"),
    }
}

/// The sample entity model.
pub fn sample_model() -> Model {
    SAMPLE_MODEL.clone()
}

/// Catalog with a few scalar functions and one table-valued function, all
/// exposed on `DbFunctions`.
pub fn sample_catalog() -> StaticFunctionCatalog {
    let sets = [
        DbFunctionSet {
            method: MethodRef::new(DB_FUNCTIONS, "Soundex"),
            overloads: vec![DbFunctionDescriptor::scalar(
                "soundex",
                Signature::new([DataTypeId::Utf8], DataType::Utf8),
            )],
        },
        DbFunctionSet {
            method: MethodRef::new(DB_FUNCTIONS, "Round"),
            overloads: vec![
                DbFunctionDescriptor::scalar(
                    "round",
                    Signature::new([DataTypeId::Float64], DataType::Float64),
                ),
                DbFunctionDescriptor::scalar(
                    "round",
                    Signature::new([DataTypeId::Decimal, DataTypeId::Int32], DataType::Decimal),
                ),
            ],
        },
        DbFunctionSet {
            method: MethodRef::new(DB_FUNCTIONS, "RecentOrders"),
            overloads: vec![
                DbFunctionDescriptor::table_valued(
                    "recent_orders",
                    Signature::new(
                        [DataTypeId::Int32],
                        DataType::queryable(DataType::entity("Order")),
                    ),
                )
                .with_schema("sales"),
            ],
        },
    ];

    let mut catalog = StaticFunctionCatalog::new();
    for set in sets {
        if let Err(e) = catalog.register(set) {
            panic!("sample catalog is invalid: {e}");
        }
    }
    catalog
}

/// Parameter ranging over rows of an entity.
pub fn row(name: &str, entity: &str) -> ParameterExpr {
    ParameterExpr::new(name, DataType::entity(entity))
}

/// Access a member of an entity-typed expression, typing it from the sample
/// model. Unknown members are typed as null.
pub fn get(target: &ExprRef, member: &str) -> ExprRef {
    let datatype = target
        .datatype()
        .entity_name()
        .and_then(|entity| SAMPLE_MODEL.entity(entity))
        .and_then(|entity| entity.member_datatype(member))
        .unwrap_or(DataType::Null);
    expr::member(target.clone(), member, datatype)
}

/// Quoted lambda.
pub fn quoted(params: &[&ParameterExpr], body: ExprRef) -> ExprRef {
    expr::quote(compiled(params, body))
}

/// Compiled lambda.
pub fn compiled(params: &[&ParameterExpr], body: ExprRef) -> ExprRef {
    expr::lambda(params.iter().map(|p| (*p).clone()).collect(), body)
}

/// Deferred query operator call.
pub fn queryable(name: &str, args: Vec<ExprRef>) -> Result<ExprRef> {
    call_operator(QUERYABLE, name, args)
}

/// In-memory sequence operator call.
pub fn enumerable(name: &str, args: Vec<ExprRef>) -> Result<ExprRef> {
    call_operator(ENUMERABLE, name, args)
}

/// Call of a sample catalog function with an explicit result type.
pub fn db_function(name: &str, args: Vec<ExprRef>, datatype: DataType) -> ExprRef {
    std::sync::Arc::new(crate::expr::Expression::MethodCall(
        crate::expr::method_call_expr::MethodCallExpr {
            method: MethodRef::new(DB_FUNCTIONS, name),
            object: None,
            args,
            datatype,
        },
    ))
}
