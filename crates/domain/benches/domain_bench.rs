use std::collections::HashMap;

use common::UserId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{ItemQuantity, Money, NewOrder, Order, OrderItem, OutboxEvent, Product, ProductId};

fn sample_items(count: usize) -> Vec<OrderItem> {
    (0..count)
        .map(|i| {
            OrderItem::new(
                format!("SKU-{i:04}"),
                format!("Item {i}"),
                format!("ART-{i}"),
                Money::from_minor(100 + i as i64),
                1 + (i % 5) as u32,
            )
        })
        .collect()
}

fn bench_create_order(c: &mut Criterion) {
    let items = sample_items(20);

    c.bench_function("domain/create_order_20_items", |b| {
        b.iter(|| {
            Order::create(NewOrder::new(UserId::new(), items.clone(), "1 Bench Rd")).unwrap()
        });
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let items = sample_items(5);

    c.bench_function("domain/create_to_closed", |b| {
        b.iter(|| {
            Order::create(NewOrder::new(UserId::new(), items.clone(), "1 Bench Rd"))
                .and_then(|o| o.start_picking())
                .and_then(|o| o.complete_picking())
                .and_then(|o| o.mark_paid())
                .and_then(|o| o.close())
                .unwrap()
        });
    });
}

fn bench_picked_items(c: &mut Criterion) {
    let order = Order::create(NewOrder::new(UserId::new(), sample_items(20), "1 Bench Rd"))
        .and_then(|o| o.start_picking())
        .unwrap();
    let mut catalog = HashMap::new();
    catalog.insert(
        ProductId::new("SKU-NEW"),
        Product::new("SKU-NEW", "New", "ART-NEW", Money::from_minor(999), 100),
    );
    let mut picked: Vec<ItemQuantity> = order
        .items()
        .iter()
        .map(|item| ItemQuantity::new(item.product_id.clone(), item.quantity + 1))
        .collect();
    picked.push(ItemQuantity::new("SKU-NEW", 2));

    c.bench_function("domain/with_picked_items_21_lines", |b| {
        b.iter(|| order.with_picked_items(&picked, &catalog).unwrap());
    });
}

fn bench_outbox_encode_decode(c: &mut Criterion) {
    let order = Order::create(NewOrder::new(UserId::new(), sample_items(20), "1 Bench Rd"))
        .unwrap();

    c.bench_function("domain/order_delivered_encode_decode", |b| {
        b.iter(|| {
            let event = OutboxEvent::order_delivered(&order).unwrap();
            event.decode().unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_full_lifecycle,
    bench_picked_items,
    bench_outbox_encode_decode
);
criterion_main!(benches);
