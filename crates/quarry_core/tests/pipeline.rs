use std::sync::Arc;

use quarry_core::compiler::QueryCompiler;
use quarry_core::config::translation::TranslationConfig;
use quarry_core::datatype::DataType;
use quarry_core::expr::parameter_expr::ParameterExpr;
use quarry_core::expr::{self, ExprRef, Expression};
use quarry_core::sql::function_call::FunctionCallExpr;
use quarry_core::sql::navigation_join::NavigationJoinExpr;
use quarry_core::testutil::{
    compiled,
    db_function,
    enumerable,
    get,
    queryable,
    quoted,
    row,
    sample_catalog,
    sample_model,
};
use quarry_core::translate::QueryTranslationPipeline;
use quarry_core::translate::state::TrackingBehavior;
use quarry_error::ErrorKind;

fn compiler() -> QueryCompiler {
    logutil::init_test();
    QueryCompiler::new(Arc::new(sample_model()), Arc::new(sample_catalog()))
}

fn translate(expr: &ExprRef) -> ExprRef {
    logutil::init_test();
    let model = sample_model();
    let catalog = sample_catalog();
    QueryTranslationPipeline::new()
        .translate(&model, &catalog, expr)
        .unwrap()
        .expr
}

fn count_joins(expr: &ExprRef) -> usize {
    let own = usize::from(expr.try_as_extension::<NavigationJoinExpr>().is_some());
    own + expr
        .children()
        .into_iter()
        .map(count_joins)
        .sum::<usize>()
}

fn contains_call(expr: &ExprRef, name: &str) -> bool {
    expr.any(&mut |e| matches!(e, Expression::MethodCall(call) if call.method.name == name))
}

/// Orders whose customer is named `name`, projected to the customer name.
fn customer_names(name: &str) -> ExprRef {
    let o = row("o", "Order");
    let filtered = queryable(
        "Where",
        vec![
            expr::entity_set("Order"),
            quoted(
                &[&o],
                expr::eq(get(&get(&expr::param(&o), "Customer"), "Name"), expr::lit(name)),
            ),
        ],
    )
    .unwrap();
    queryable(
        "Select",
        vec![
            filtered,
            quoted(&[&o], get(&get(&expr::param(&o), "Customer"), "Name")),
        ],
    )
    .unwrap()
}

#[test]
fn navigation_traversed_twice_joins_once() {
    let compiled = compiler().compile(&customer_names("Ruth")).unwrap();
    let tree = &compiled.entry.expr;

    assert_eq!(1, count_joins(tree));
    assert_eq!(
        "Queryable.Select(Queryable.Where(Set<Order> JOIN customers AS t0 ON r => r.CustomerId = i => i.Id, quote(o => (t0.Name == __p_0))), quote(o => t0.Name))",
        tree.to_string()
    );
}

#[test]
fn second_run_is_identity() {
    let once = translate(&customer_names("Ruth"));
    let twice = translate(&once);
    assert_eq!(once, twice);
}

#[test]
fn unaffected_siblings_shared() {
    let c = row("c", "Customer");
    let x = ParameterExpr::new("x", DataType::Int32);
    let filtered = queryable(
        "Where",
        vec![
            expr::entity_set("Customer"),
            quoted(&[&c], expr::eq(get(&expr::param(&c), "Name"), expr::lit("Ruth"))),
        ],
    )
    .unwrap();
    let ids = expr::list(
        DataType::Int32,
        [1, 2, 3].into_iter().map(|v: i32| v.into()),
    );
    let any = enumerable(
        "Any",
        vec![
            ids.clone(),
            compiled(&[&x], expr::eq(expr::param(&x), get(&expr::param(&c), "Id"))),
        ],
    )
    .unwrap();
    let input = queryable("Select", vec![filtered.clone(), quoted(&[&c], any)]).unwrap();

    let got = translate(&input);
    let call = got.try_as_method_call().unwrap();
    assert!(Arc::ptr_eq(&filtered, &call.args[0]));

    let contains = call.args[1].try_as_lambda().unwrap().body.clone();
    let contains = contains.try_as_method_call().unwrap();
    assert_eq!("Contains", contains.method.name);
    assert!(Arc::ptr_eq(&ids, &contains.args[0]));
}

#[test]
fn composite_key_equality() {
    let a = row("a", "OrderLine");
    let b = row("b", "OrderLine");
    let got = translate(&expr::eq(expr::param(&a), expr::param(&b)));
    assert_eq!(
        "((a.OrderId == b.OrderId) AND (a.LineNo == b.LineNo))",
        got.to_string()
    );
}

#[test]
fn composite_key_null_comparison() {
    let s = row("s", "Shipment");
    let input = queryable(
        "Where",
        vec![
            expr::entity_set("Shipment"),
            quoted(
                &[&s],
                expr::eq(
                    get(&expr::param(&s), "Line"),
                    expr::null(DataType::entity("OrderLine")),
                ),
            ),
        ],
    )
    .unwrap();

    let compiled = compiler().compile(&input).unwrap();
    assert_eq!(
        "Queryable.Where(Set<Shipment>, quote(s => (s.OrderId IS NULL AND s.LineNo IS NULL)))",
        compiled.entry.expr.to_string()
    );
    assert!(compiled.parameters.is_empty());
}

#[test]
fn mismatched_entity_comparison_reported() {
    let o = row("o", "Order");
    let input = queryable(
        "Where",
        vec![
            expr::entity_set("Order"),
            quoted(
                &[&o],
                expr::eq(get(&expr::param(&o), "Customer"), expr::param(&o)),
            ),
        ],
    )
    .unwrap();

    let err = compiler().compile(&input).unwrap_err();
    assert_eq!(ErrorKind::IncompatibleEntityComparison, err.kind());
    assert_eq!(Some("entity_equality"), err.pass());
    assert_eq!(Some("(o.Customer == o)"), err.node());
}

fn any_over_ids(predicate: impl FnOnce(&ParameterExpr, &ParameterExpr) -> ExprRef) -> ExprRef {
    let c = row("c", "Customer");
    let x = ParameterExpr::new("x", DataType::Int32);
    let ids = expr::list(
        DataType::Int32,
        [4, 8].into_iter().map(|v: i32| v.into()),
    );
    let body = predicate(&x, &c);
    let any = enumerable("Any", vec![ids, compiled(&[&x], body)]).unwrap();
    queryable("Where", vec![expr::entity_set("Customer"), quoted(&[&c], any)]).unwrap()
}

#[test]
fn any_equality_becomes_membership_test() {
    let input = any_over_ids(|x, c| expr::eq(expr::param(x), get(&expr::param(c), "Id")));
    let compiled = compiler().compile(&input).unwrap();

    assert_eq!(
        "Queryable.Where(Set<Customer>, quote(c => Enumerable.Contains(__p_0, c.Id)))",
        compiled.entry.expr.to_string()
    );
    assert_eq!(1, compiled.parameters.len());
}

#[test]
fn any_complex_predicate_stays_existential() {
    let input = any_over_ids(|x, c| {
        expr::and(
            expr::eq(expr::param(x), get(&expr::param(c), "Id")),
            expr::not_eq(expr::param(x), expr::lit(3)),
        )
    });
    let compiled = compiler().compile(&input).unwrap();

    assert!(!contains_call(&compiled.entry.expr, "Contains"));
    assert!(contains_call(&compiled.entry.expr, "Any"));
}

#[test]
fn two_argument_function_resolved() {
    let l = row("l", "OrderLine");
    let round = db_function(
        "Round",
        vec![get(&expr::param(&l), "Quantity"), expr::lit(2)],
        DataType::Decimal,
    );
    let input = queryable(
        "Select",
        vec![expr::entity_set("OrderLine"), quoted(&[&l], round)],
    )
    .unwrap();

    let compiled = compiler().compile(&input).unwrap();
    let select = compiled.entry.expr.try_as_method_call().unwrap();
    let body = &select.args[1].try_as_lambda().unwrap().body;
    let call = body.try_as_extension::<FunctionCallExpr>().unwrap();

    assert_eq!("round", call.function.name);
    assert_eq!(2, call.function.signature.positional_args.len());
    assert_eq!("round(l.Quantity, __p_0)", body.to_string());
}

#[test]
fn function_arity_mismatch_reported() {
    let c = row("c", "Customer");
    let soundex = db_function(
        "Soundex",
        vec![get(&expr::param(&c), "Name"), expr::lit("x")],
        DataType::Utf8,
    );
    let input = queryable(
        "Select",
        vec![expr::entity_set("Customer"), quoted(&[&c], soundex)],
    )
    .unwrap();

    let err = compiler().compile(&input).unwrap_err();
    assert_eq!(ErrorKind::UnresolvedFunctionOverload, err.kind());
    assert_eq!(Some("function_preprocessing"), err.pass());
}

#[test]
fn table_valued_function_in_projection_reported() {
    let c = row("c", "Customer");
    let recent = db_function(
        "RecentOrders",
        vec![get(&expr::param(&c), "Id")],
        DataType::queryable(DataType::entity("Order")),
    );
    let input = queryable(
        "Select",
        vec![
            expr::entity_set("Customer"),
            quoted(&[&c], expr::new_object(vec![("Recent".to_string(), recent)])),
        ],
    )
    .unwrap();

    let err = compiler().compile(&input).unwrap_err();
    assert_eq!(ErrorKind::TableValuedFunctionInScalarPosition, err.kind());
    assert_eq!(Some("function_preprocessing"), err.pass());
}

#[test]
fn markers_recorded_and_stripped() {
    let tagged = queryable(
        "TagWith",
        vec![
            queryable("AsNoTracking", vec![customer_names("Ruth")]).unwrap(),
            expr::lit("monthly report"),
        ],
    )
    .unwrap();

    let compiled = compiler().compile(&tagged).unwrap();
    let metadata = &compiled.entry.metadata;
    assert_eq!(vec!["monthly report".to_string()], metadata.tags);
    assert_eq!(TrackingBehavior::NoTracking, metadata.tracking);
    assert!(!contains_call(&compiled.entry.expr, "TagWith"));
    assert!(!contains_call(&compiled.entry.expr, "AsNoTracking"));
}

#[test]
fn literals_share_compiled_shape() {
    let compiler = compiler();
    let ruth = compiler.compile(&customer_names("Ruth")).unwrap();
    let ann = compiler.compile(&customer_names("Ann")).unwrap();

    assert!(Arc::ptr_eq(&ruth.entry, &ann.entry));
    assert_eq!(1, compiler.cache_stats().hits);
    assert_eq!(1, compiler.cache_stats().misses);
    assert_ne!(ruth.parameters, ann.parameters);
}

#[test]
fn concurrent_compiles_agree() {
    let compiler = compiler();
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let compiler = &compiler;
                s.spawn(move || compiler.compile(&customer_names(&format!("name{i}"))))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });

    let first = &results[0].entry.expr;
    assert!(results.iter().all(|r| &r.entry.expr == first));
    assert_eq!(1, compiler.cached_queries());

    let stats = compiler.cache_stats();
    assert_eq!(8, stats.hits + stats.misses);
}

/// Customers left joined to their orders through `GroupJoin` and
/// `DefaultIfEmpty`, projected with `result`.
fn customers_with_orders(
    result: impl FnOnce(&ParameterExpr, &ParameterExpr) -> ExprRef,
) -> ExprRef {
    let c = row("c", "Customer");
    let o = row("o", "Order");
    let g = ParameterExpr::new("g", DataType::sequence(o.datatype.clone()));
    let pair = expr::new_object(vec![
        ("Outer".to_string(), expr::param(&c)),
        ("Group".to_string(), expr::param(&g)),
    ]);
    let group_join = queryable(
        "GroupJoin",
        vec![
            expr::entity_set("Customer"),
            expr::entity_set("Order"),
            quoted(&[&c], get(&expr::param(&c), "Id")),
            quoted(&[&o], get(&expr::param(&o), "CustomerId")),
            quoted(&[&c, &g], pair.clone()),
        ],
    )
    .unwrap();

    let t = ParameterExpr::new("t", pair.datatype());
    let group = expr::member(expr::param(&t), "Group", DataType::sequence(o.datatype.clone()));
    let orders = queryable(
        "DefaultIfEmpty",
        vec![queryable("AsQueryable", vec![group]).unwrap()],
    )
    .unwrap();
    let body = result(&t, &o);
    queryable(
        "SelectMany",
        vec![group_join, quoted(&[&t], orders), quoted(&[&t, &o], body)],
    )
    .unwrap()
}

#[test]
fn null_guard_on_left_joined_row_kept() {
    let input = customers_with_orders(|_, o| {
        let total = get(&expr::param(o), "Total");
        expr::conditional(
            expr::eq(expr::param(o), expr::null(DataType::entity("Order"))),
            expr::null(total.datatype()),
            total,
        )
    });

    let compiled = compiler().compile(&input).unwrap();
    let tree = &compiled.entry.expr;
    assert!(contains_call(tree, "LeftJoin"));
    assert!(tree.any(&mut |e| matches!(e, Expression::Conditional(_))));
    assert!(tree.to_string().contains("o.Id IS NULL"));
}

#[test]
fn navigation_behind_optional_hop_stays_outer() {
    let s = row("s", "Shipment");
    let input = queryable(
        "Select",
        vec![
            expr::entity_set("Shipment"),
            quoted(
                &[&s],
                get(&get(&get(&expr::param(&s), "Line"), "Order"), "Total"),
            ),
        ],
    )
    .unwrap();

    let compiled = compiler().compile(&input).unwrap();
    let tree = compiled.entry.expr.to_string();
    assert_eq!(2, count_joins(&compiled.entry.expr));
    assert_eq!(2, tree.matches("LEFT JOIN").count());
    assert!(tree.contains("LEFT JOIN sales.orders AS t1"));
}

#[test]
fn unexpanded_navigation_caught_by_verification() {
    let o = row("o", "Order");
    let l = row("l", "OrderLine");
    let input = queryable(
        "SelectMany",
        vec![
            expr::entity_set("Order"),
            quoted(&[&o], get(&expr::param(&o), "Lines")),
            quoted(
                &[&o, &l],
                get(&get(&expr::param(&l), "Order"), "Status"),
            ),
        ],
    )
    .unwrap();

    let err = compiler().compile(&input).unwrap_err();
    assert_eq!(ErrorKind::UnsupportedExpressionShape, err.kind());
    assert_eq!(Some("verify"), err.pass());

    let mut config = TranslationConfig::default();
    config.set_from_str("verify_normalized_tree", "false").unwrap();
    let compiler = QueryCompiler::with_config(
        Arc::new(sample_model()),
        Arc::new(sample_catalog()),
        config,
    );
    compiler.compile(&input).unwrap();
}
