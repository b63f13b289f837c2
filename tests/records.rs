use collinea::pipeline::{Pipeline, Settings};
use collinea::records::{read_records_file, write_records_file};
use collinea::segments::{read_links, Segmentation};
use pretty_assertions::assert_eq;

const SEGMENTS: &str = "A\t0 10 20 30\nB\t0 10 20 30\n";

#[test]
fn records_survive_a_file() {
    let segmentation = Segmentation::from_reader(SEGMENTS.as_bytes()).unwrap();
    // B runs backwards against A
    let links = read_links("A:0\tB:2\t0\t2\nA:1\tB:1\t0\t2\nA:2\tB:0\t0\t2\n".as_bytes(), &segmentation).unwrap();
    let mut p = Pipeline::new(segmentation, Settings::default());
    p.add_links(&links);
    p.build().unwrap();
    p.order(true).unwrap();

    let records = p.records().unwrap();
    assert_eq!(records.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.tsv");
    let path = path.to_str().unwrap();
    write_records_file(path, &records, p.segmentation().registry()).unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.contains("A:0-3F"), "{}", content);
    assert!(content.contains("B:3-0R"), "{}", content);

    let back = read_records_file(path, p.segmentation()).unwrap();
    assert_eq!(back, records);
}

#[test]
fn records_feed_a_new_run() {
    let segmentation = Segmentation::from_reader(SEGMENTS.as_bytes()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prior.tsv");
    std::fs::write(&path, "prior\tA:0-2F;B:1-3F\n").unwrap();

    let records = read_records_file(path.to_str().unwrap(), &segmentation).unwrap();
    let mut p = Pipeline::new(segmentation, Settings::default());
    p.add_records(&records);
    assert_eq!(p.links().len(), 2);

    let report = p.build().unwrap();
    assert_eq!(report.created, 2);
    // A2 and B0 remain on their own
    assert_eq!(p.chains().map(|c| c.len()), Some(4));
}

#[test]
fn missing_files_are_reported() {
    let segmentation = Segmentation::from_reader(SEGMENTS.as_bytes()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nowhere.tsv");
    assert!(read_records_file(path.to_str().unwrap(), &segmentation).is_err());
}
