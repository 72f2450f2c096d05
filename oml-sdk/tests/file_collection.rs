use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use oml_sdk::{values, Client, ClientOptions, FieldType, MeasurementPoint, Value};

fn options(path: &Path) -> ClientOptions {
    ClientOptions::new()
        .domain("foo")
        .sender_id("n1")
        .app_name("demo")
        .collect_uri(format!("file:{}", path.display()))
}

fn sin() -> MeasurementPoint {
    MeasurementPoint::builder("sin")
        .field("label", FieldType::String)
        .field("angle", FieldType::Int32)
        .field("value", FieldType::Double)
        .build()
}

fn split(text: &str) -> Vec<Vec<&str>> {
    text.lines().map(|l| l.split('\t').collect()).collect()
}

#[test]
fn sine_wave_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sin.oml");

    let client = Client::new();
    let sin = client.define(sin()).unwrap();
    client.init(options(&path)).unwrap();
    client.inject(&sin, &values!["label_0", 0, 0.0]).unwrap();
    client.inject(&sin, &values!["label_15", 15, 0.2588]).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        &lines[..3],
        &["protocol: 4", "content: text", "domain: foo"]
    );
    assert!(lines[3].starts_with("start-time: "));
    assert_eq!(
        &lines[4..8],
        &[
            "sender-id: n1",
            "app-name: demo",
            "schema: 0 _experiment_metadata subject:string key:string value:string",
            "",
        ]
    );

    let body = lines[8..].join("\n");
    let rows = split(&body);
    assert_eq!(rows.len(), 3);
    assert_eq!(
        &rows[0][1..],
        &["0", "1", ".", "schema", "1 demo_sin label:string angle:int32 value:double"]
    );
    assert_eq!(&rows[1][1..], &["1", "1", "label_0", "0", "0.0"]);
    assert_eq!(&rows[2][1..], &["1", "2", "label_15", "15", "0.2588"]);
    for row in &rows {
        let (_, micros) = row[0].split_once('.').unwrap();
        assert_eq!(micros.len(), 6);
    }
}

#[test]
fn absent_double_and_booleans() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("types.oml");

    let client = Client::new();
    let mp = client
        .define(
            MeasurementPoint::builder("types")
                .field("d", FieldType::Double)
                .field("b", FieldType::Bool)
                .field("s", FieldType::String)
                .field("blob", FieldType::Blob)
                .build(),
        )
        .unwrap();
    client.init(options(&path)).unwrap();
    client
        .inject(
            &mp,
            &[
                Value::Null,
                true.into(),
                "a\tb\\c\nd".into(),
                Value::Blob(b"hi".to_vec()),
            ],
        )
        .unwrap();
    client.inject(&mp, &values![1.5, false, "", Vec::<u8>::new()]).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&path).unwrap();
    let data: Vec<Vec<&str>> = split(&text)
        .into_iter()
        .filter(|r| r.len() > 1 && r[1] == "1")
        .collect();
    assert_eq!(&data[0][3..], &["NaN", "True", "a\\tb\\\\c\\nd", "aGk="]);
    assert_eq!(&data[1][3..], &["1.5", "False", "", ""]);
}

#[test]
fn schema_precedes_data_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.oml");

    let client = Arc::new(Client::new());
    let points: Vec<_> = (0..4)
        .map(|i| {
            client
                .define(
                    MeasurementPoint::builder(format!("mp{}", i))
                        .field("worker", FieldType::UInt32)
                        .field("n", FieldType::UInt64)
                        .build(),
                )
                .unwrap()
        })
        .collect();
    client.init(options(&path)).unwrap();

    let threads: Vec<_> = (0..8u32)
        .map(|w| {
            let client = client.clone();
            let points = points.clone();
            std::thread::spawn(move || {
                for n in 0..200u64 {
                    let mp = &points[(n as usize + w as usize) % points.len()];
                    client.inject(mp, &values![w, n]).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    client.stop();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut announced = std::collections::HashSet::new();
    let mut last_seq = std::collections::HashMap::new();
    let mut total = 0;
    for row in split(&text).into_iter().filter(|r| r.len() > 1) {
        if row[1] == "0" {
            assert_eq!(row[4], "schema");
            let index = row[5].split(' ').next().unwrap().to_string();
            announced.insert(index);
            continue;
        }
        assert!(announced.contains(row[1]), "data before schema {}", row[1]);
        let seq: u64 = row[2].parse().unwrap();
        let prev = last_seq.insert(row[1].to_string(), seq).unwrap_or(0);
        assert_eq!(seq, prev + 1);
        total += 1;
    }
    assert_eq!(total, 8 * 200);
    assert_eq!(announced.len(), 4);
}

#[test]
fn per_point_domain_gets_its_own_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("domains.oml");

    let client = Client::new();
    let main = client.define(sin()).unwrap();
    let other = client
        .define(
            MeasurementPoint::builder("other")
                .field("x", FieldType::Int32)
                .domain("bar")
                .build(),
        )
        .unwrap();
    client.init(options(&path)).unwrap();
    client.inject(&main, &values!["a", 1, 1.0]).unwrap();
    client.inject(&other, &values![7]).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("protocol: 4").count(), 2);
    assert!(text.contains("domain: foo\n"));
    assert!(text.contains("domain: bar\n"));
    // both domains start numbering at 1
    assert_eq!(text.matches("\tschema\t1 ").count(), 2);
}

#[test]
fn per_point_domain_connects_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let path = sub.join("out.oml");

    let client = Client::new();
    let other = client
        .define(
            MeasurementPoint::builder("other")
                .field("x", FieldType::Int32)
                .domain("bar")
                .build(),
        )
        .unwrap();
    client
        .init(options(&path).reconnect_delay(Duration::from_millis(20)))
        .unwrap();

    // the second domain cannot open its file, yet injection succeeds
    std::fs::remove_dir_all(&sub).unwrap();
    client.inject(&other, &values![7]).unwrap();
    client.inject(&other, &values![8]).unwrap();

    std::fs::create_dir(&sub).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("domain: bar\n"));
    assert!(!text.contains("domain: foo\n"));
    let rows = split(&text);
    let data: Vec<_> = rows.iter().filter(|r| r.len() == 4 && r[1] == "1").collect();
    assert_eq!(data.len(), 2);
    assert_eq!(data[1][3], "8");
}

#[test]
fn metadata_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.oml");
    let second = dir.path().join("second.oml");

    let client = Client::new();
    let sin = client.define(sin()).unwrap();
    client.init(options(&first)).unwrap();
    client.inject_experiment_metadata("operator", "alice");
    client
        .inject_metadata(&sin, "unit", "rad", Some("angle"))
        .unwrap();
    client.inject(&sin, &values!["a", 1, 1.0]).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&first).unwrap();
    assert!(text.contains("\t0\t1\t.\toperator\talice\n"));
    assert!(text.contains("\t0\t3\t.demo_sin.angle\tunit\trad\n"));

    // a second run starts from fresh counters
    client.init(options(&second)).unwrap();
    client.inject(&sin, &values!["b", 2, 2.0]).unwrap();
    client.stop();

    let text = std::fs::read_to_string(&second).unwrap();
    let rows = split(&text);
    let data: Vec<_> = rows.iter().filter(|r| r.len() == 6 && r[1] == "1").collect();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0][2], "1");
}
