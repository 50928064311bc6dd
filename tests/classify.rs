//! End-to-end classification scenarios against the public API, one load +
//! one classify per case.

use magic_rules::{classify, load_database_str};

#[test]
fn little_endian_integer() {
    let (db, report) = load_database_str("0 lelong 0x03cbc6c5 match\n");
    assert_eq!(report.accepted, 1);
    let result = classify(&db, &[0xc5, 0xc6, 0xcb, 0x03]);
    assert_eq!(result.formatted_message, "match");
    assert!(!result.partial_only);
}

#[test]
fn big_endian_unsigned_greater_than() {
    let (db, _) = load_database_str("0 ubelong >0xF0000000 match\n");
    let result = classify(&db, &[0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(result.formatted_message, "match");

    let (db_signed, _) = load_database_str("0 belong >0xF0000000 match\n");
    let buf = [0x7F, 0xFF, 0xFF, 0xFF];
    assert_eq!(classify(&db_signed, &buf).formatted_message, "match");

    let (db_unsigned, _) = load_database_str("0 ubelong >0xF0000000 match\n");
    assert_eq!(classify(&db_unsigned, &buf).formatted_message, "");
}

#[test]
fn search_with_optional_whitespace() {
    let (db, _) = load_database_str(r"0 search/10/w h\ e\ llo %s");
    let result = classify(&db, b"12hello 24");
    assert_eq!(result.formatted_message, "h e llo");
    assert!(!result.partial_only);
}

#[test]
fn pascal_string_length() {
    let (db, _) = load_database_str("0 pstring =hello\n");
    let buf = [0x05, b'h', b'e', b'l', b'l', b'o', 0xFF];
    let result = classify(&db, &buf);
    assert!(!result.partial_only);
    assert_ne!(result.raw_message, "");
}

#[test]
fn regex_with_escapes() {
    let (db, report) = load_database_str(r"15 regex/c hrm\t\0\xB\\\\wow %s");
    assert_eq!(report.accepted, 1);
    let buf = b"some line with hrm\t\0\x0B\\wow in it";
    let result = classify(&db, buf);
    assert!(!result.partial_only);
    assert!(result.formatted_message.contains("hrm"));
}

#[test]
fn named_use_with_endian_inversion() {
    // `swapped` declares its check as big-endian; invoking it through
    // `use ^swapped` flips that to little-endian for this call.
    let src = "0 name swapped\n>0 beshort 0x0102 ok\n\
               0 belong 0xDEADBEEF header\n>&0 use ^swapped\n";
    let (db, report) = load_database_str(src);
    assert_eq!(report.accepted, 4);
    let buf = [0xDE, 0xAD, 0xBE, 0xEF, 0x02, 0x01];
    let result = classify(&db, &buf);
    assert_eq!(result.formatted_message, "header ok");
    assert!(!result.partial_only);
}

#[test]
fn first_byte_index_is_hint_only() {
    use magic_rules::matcher::{classify_with_options, MatchOptions};

    let src = "0 lelong 0x03cbc6c5 int_match\n0 string ABC str_match\n";
    let (db, _) = load_database_str(src);
    let buf = b"ABCxyz";

    let indexed = classify_with_options(&db, buf, &MatchOptions::default());
    let full_list = magic_rules::matcher::classify(&db, buf);
    assert_eq!(indexed.formatted_message, full_list.formatted_message);
    assert_eq!(indexed.formatted_message, "str_match");
}

#[test]
fn classification_is_idempotent() {
    let (db, _) = load_database_str("0 lelong 0x03cbc6c5 match\n");
    let buf = [0xc5, 0xc6, 0xcb, 0x03];
    let a = classify(&db, &buf);
    let b = classify(&db, &buf);
    assert_eq!(a.formatted_message, b.formatted_message);
    assert_eq!(a.partial_only, b.partial_only);
}

#[test]
fn no_out_of_bounds_read_on_truncated_buffer() {
    let (db, _) = load_database_str("0 lelong 0x03cbc6c5 match\n>4 string ABC nested\n");
    for len in 0..4 {
        let buf = vec![0xc5, 0xc6, 0xcb, 0x03];
        let result = classify(&db, &buf[..len]);
        assert_eq!(result.formatted_message, "");
    }
}
