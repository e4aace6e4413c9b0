//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gnsslink_core::core::protocol::nmea::{self, NmeaParser};
use gnsslink_core::core::protocol::rtcm3::{ReferenceStation, Rtcm3Message, Rtcm3Parser, Rtcm3Payload};
use gnsslink_core::core::protocol::ubx::{NavPosLlh, UbxMessage, UbxParser, UbxPayload};
use gnsslink_core::{Demultiplexer, ProtocolMessage, ProtocolParser};

fn mixed_stream() -> Vec<u8> {
    let posllh = UbxMessage::new(UbxPayload::NavPosLlh(NavPosLlh {
        itow: 345_600_000,
        lon: 373_456_789,
        lat: 557_123_456,
        height: 180_250,
        h_msl: 165_000,
        h_acc: 1_200,
        v_acc: 2_100,
    }))
    .encode_frame()
    .unwrap();
    let station = Rtcm3Message::new(Rtcm3Payload::Msg1006(ReferenceStation {
        station_id: 2003,
        indicators: 0b0111,
        x: 11_141_045_999,
        y: -48_507_297_405,
        z: 39_758_217_037,
        antenna_height: Some(15_000),
        ..Default::default()
    }))
    .encode_frame()
    .unwrap();
    let gga = nmea::encode_frame(
        "GPGGA",
        b"123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,",
    );

    let mut data = Vec::new();
    for _ in 0..64 {
        data.extend_from_slice(&posllh);
        data.extend_from_slice(b"\x00\xFF noise");
        data.extend_from_slice(&gga);
        data.extend_from_slice(&station);
    }
    data
}

fn parsers() -> Vec<Box<dyn ProtocolParser>> {
    vec![
        Box::new(UbxParser::new()),
        Box::new(NmeaParser::new()),
        Box::new(Rtcm3Parser::new()),
    ]
}

fn demux_benchmark(c: &mut Criterion) {
    let data = mixed_stream();

    let mut group = c.benchmark_group("demux");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("mixed_whole_buffer", |b| {
        let mut demux = Demultiplexer::new(parsers()).unwrap();
        b.iter(|| black_box(demux.push(black_box(&data))))
    });

    group.bench_function("mixed_small_chunks", |b| {
        let mut demux = Demultiplexer::new(parsers()).unwrap();
        b.iter(|| {
            let mut frames = 0;
            for chunk in data.chunks(64) {
                frames += demux.push(black_box(chunk));
            }
            black_box(frames)
        })
    });

    group.finish();
}

fn nmea_benchmark(c: &mut Criterion) {
    let sentence = nmea::encode_frame(
        "GNRMC",
        b"123519,A,4807.038,N,01131.000,W,022.4,084.4,230394,003.1,W",
    );
    let data: Vec<u8> = sentence.iter().copied().cycle().take(sentence.len() * 100).collect();

    let mut group = c.benchmark_group("nmea");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("rmc_stream", |b| {
        let mut demux = Demultiplexer::new(vec![Box::new(NmeaParser::new())]).unwrap();
        b.iter(|| black_box(demux.push(black_box(&data))))
    });

    group.bench_function("hex_dump", |b| {
        b.iter(|| black_box(hex::encode(black_box(&sentence))))
    });

    group.finish();
}

criterion_group!(benches, demux_benchmark, nmea_benchmark);
criterion_main!(benches);
