use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use sqlwire::{
    Config, ErrorKind, ValueReader, ValueWriter,
    frame::{ResponseFrame, ResponseInfo},
};

mod common;

use common::{ipc_wire, serve_query};

#[tokio::test(flavor = "multi_thread")]
async fn byte_count_conservation() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let records = (0..128u8).map(|i| Bytes::from(vec![i; 1024])).collect();
    let producer = tokio::spawn(async move {
        serve_query(&mut endpoint, "rs-128", records, 256).await;
        endpoint
    });

    let (head, body) = wire.send_query(1, b"SELECT blob").unwrap();
    let name = head.get().await.unwrap();
    assert_eq!(&name[..], b"rs-128");

    let mut result_set = wire.create_result_set_wire();
    result_set.connect(std::str::from_utf8(&name).unwrap()).unwrap();

    let mut total = 0;
    let mut buf = [0u8; 100];
    loop {
        let n = result_set.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, 128 * 1024);
    assert_eq!(result_set.read(&mut buf).await.unwrap(), 0);

    assert_eq!(&body.get().await.unwrap()[..], b"ok");
    producer.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_result_set_does_not_stall_producer() {
    let (wire, mut endpoint) = ipc_wire(Config::default().result_set_buffer(8));

    let records = (0..512).map(|_| Bytes::from(vec![7u8; 1024])).collect();
    let producer = tokio::spawn(async move {
        serve_query(&mut endpoint, "big", records, 1024).await;
        endpoint
    });

    let (head, body) = wire.send_query(1, b"SELECT big").unwrap();
    head.get().await.unwrap();

    let mut result_set = wire.create_result_set_wire();
    result_set.connect("big").unwrap();
    assert_eq!(result_set.next_record().await.unwrap().unwrap().len(), 1024);

    let started = Instant::now();
    result_set.close();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(result_set.next_record().await.unwrap_err().is_closed());

    tokio::time::timeout(Duration::from_secs(5), producer).await.unwrap().unwrap();
    assert_eq!(&body.get().await.unwrap()[..], b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_consumer_holds_back_producer() {
    let (wire, mut endpoint) = ipc_wire(Config::default().result_set_buffer(4));

    let records = (0..256u32).map(|i| Bytes::copy_from_slice(&i.to_le_bytes())).collect();
    let mut producer = tokio::spawn(async move {
        serve_query(&mut endpoint, "slow", records, 16).await;
        endpoint
    });

    let (head, body) = wire.send_query(1, b"SELECT slow").unwrap();
    head.get().await.unwrap();

    let mut result_set = wire.create_result_set_wire();
    result_set.connect("slow").unwrap();

    // nothing taken yet, the producer cannot get every record out
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut producer).await.is_err());
    assert!(!body.is_done());

    let mut count = 0u32;
    while let Some(record) = result_set.next_record().await.unwrap() {
        assert_eq!(&record[..], count.to_le_bytes());
        count += 1;
    }
    assert_eq!(count, 256);

    tokio::time::timeout(Duration::from_secs(5), producer).await.unwrap().unwrap();
    assert_eq!(&body.get().await.unwrap()[..], b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_slow_consumer_releases_producer() {
    let (wire, mut endpoint) = ipc_wire(Config::default().result_set_buffer(2));

    let records = (0..128).map(|_| Bytes::from_static(b"row")).collect();
    let mut producer = tokio::spawn(async move {
        serve_query(&mut endpoint, "dropped", records, 16).await;
        endpoint
    });

    let (head, body) = wire.send_query(1, b"SELECT dropped").unwrap();
    head.get().await.unwrap();

    let result_set = {
        let mut result_set = wire.create_result_set_wire();
        result_set.connect("dropped").unwrap();
        result_set
    };
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut producer).await.is_err());

    drop(result_set);
    tokio::time::timeout(Duration::from_secs(5), producer).await.unwrap().unwrap();
    assert_eq!(&body.get().await.unwrap()[..], b"ok");
}

#[tokio::test]
async fn decoded_records() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let records = (1..=3i64)
        .map(|id| {
            let mut writer = ValueWriter::new(BytesMut::new());
            writer.write_row_begin(2);
            writer.write_int(id);
            writer.write_character(&format!("row {id}"));
            writer.into_inner().freeze()
        })
        .collect();
    let producer = tokio::spawn(async move {
        serve_query(&mut endpoint, "rows", records, 3).await;
        endpoint
    });

    let (head, _body) = wire.send_query(1, b"SELECT id, name").unwrap();
    head.get().await.unwrap();

    let mut result_set = wire.create_result_set_wire();
    result_set.connect("rows").unwrap();

    let mut ids = vec![];
    while let Some(record) = result_set.next_record().await.unwrap() {
        let mut reader = ValueReader::new(record);
        assert_eq!(reader.read_row_begin().unwrap(), 2);
        let id = reader.read_int().unwrap();
        assert_eq!(reader.read_character().unwrap(), format!("row {id}"));
        reader.read_end_of_contents().unwrap();
        ids.push(id);
    }
    assert_eq!(ids, [1, 2, 3]);
    producer.await.unwrap();
}

#[tokio::test]
async fn server_crash_mid_result_set() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let (head, _body) = wire.send_query(1, b"SELECT 1").unwrap();
    let frame = endpoint.recv().await.unwrap();
    endpoint.send(ResponseFrame::new(ResponseInfo::SessionBodyHead, frame.slot, &b"rs"[..])).await.unwrap();
    endpoint.send(ResponseFrame::new(ResponseInfo::ResultSetHello, 0, &b"rs"[..])).await.unwrap();
    endpoint.send(ResponseFrame::result_set_payload(0, 0, &b"partial"[..])).await.unwrap();

    head.get().await.unwrap();
    let mut result_set = wire.create_result_set_wire();
    result_set.connect("rs").unwrap();

    drop(endpoint);

    let err = result_set.next_record().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ServerCrashed(_)));
}

#[tokio::test]
async fn empty_name_is_rejected() {
    let (wire, _endpoint) = ipc_wire(Config::default());
    let mut result_set = wire.create_result_set_wire();

    let err = result_set.connect("").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument(_)));
}
