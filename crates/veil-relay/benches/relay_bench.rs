use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use veil_relay::election::{Candidate, elect};
use veil_relay::frame::max_frame_size;
use veil_relay::{
    Client, Frame, MAX_PACKET_SIZE, PublicKey, RoutingTable, SecretKey, Server, Session,
};

fn key(i: u32) -> PublicKey {
    let mut bytes = [0xA5u8; 32];
    bytes[..4].copy_from_slice(&i.to_be_bytes());
    PublicKey::from_bytes(bytes)
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [64usize, 1200, 16 * 1024] {
        let frame = Frame::SendPacket {
            destination: key(1),
            payload: vec![0xBB; size],
        };
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame).encode().unwrap())
        });
    }

    group.finish();
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    let max = max_frame_size(MAX_PACKET_SIZE);

    for size in [64usize, 1200, 16 * 1024] {
        let data = Frame::RecvPacket {
            source: key(2),
            payload: vec![0x42; size],
        }
        .encode()
        .unwrap();
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| Frame::parse(black_box(data), max).unwrap())
        });
    }

    group.finish();
}

fn bench_routing_lookup(c: &mut Criterion) {
    let table = RoutingTable::new();
    for i in 0..10_000 {
        let (session, _queue) = Session::new(key(i), format!("c{i}"), 1);
        table.register(Arc::new(session));
    }

    let mut group = c.benchmark_group("routing");
    group.bench_function("lookup_hit_10k", |b| {
        b.iter(|| table.lookup(black_box(&key(4242))))
    });
    group.bench_function("lookup_miss_10k", |b| {
        b.iter(|| table.lookup(black_box(&key(99_999))))
    });
    group.finish();
}

fn bench_election(c: &mut Criterion) {
    let candidates: Vec<Candidate> = (0..8)
        .map(|i| Candidate {
            preferred: i % 3 == 0,
            preferred_at: i,
        })
        .collect();

    c.bench_function("elect_8_candidates", |b| {
        b.iter(|| elect(black_box(&candidates)))
    });
}

fn bench_relay_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = Server::new(SecretKey::generate());

    let connect = |label: &'static str| {
        let (server_side, client_side) = tokio::io::duplex(256 * 1024);
        let s = server.clone();
        rt.spawn(async move { s.accept(server_side, label).await });
        rt.block_on(Client::connect(&SecretKey::generate(), client_side))
            .unwrap()
    };
    let alice = connect("alice");
    let bob = connect("bob");
    rt.block_on(async {
        while server.current_clients() < 2 {
            tokio::task::yield_now().await;
        }
    });

    let payload = vec![0xCC; 1200];
    let mut group = c.benchmark_group("relay");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("send_recv_1200_bytes", |b| {
        b.iter(|| {
            rt.block_on(async {
                alice.send(bob.public_key(), &payload).await.unwrap();
                bob.recv().await.unwrap()
            })
        })
    });
    group.finish();

    server.close();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_parse,
    bench_routing_lookup,
    bench_election,
    bench_relay_round_trip
);
criterion_main!(benches);
