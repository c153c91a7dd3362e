//! Property-based tests for the columnar codec.
//!
//! Any map of supported arrays must come back unchanged from
//! encode → FlightData → decode, with names, element types, values and
//! shapes intact. Floats must come back bit for bit.

use arrow::datatypes::{Float32Type, Float64Type};
use arrow_flight::decode::FlightRecordBatchStream;
use numflight::transport::{collect_table, table_to_flight_data};
use numflight::{decode, encode, encode_with_batch_size, ArrayMap, FlightError, NdArray, Table};
use proptest::prelude::*;

/// Generator for one array of a random supported element type.
fn arb_values() -> impl Strategy<Value = NdArray> {
    let len = 0..64usize;
    let integers = prop_oneof![
        prop::collection::vec(any::<i8>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<i16>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<i32>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<i64>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<u8>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<u16>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<u32>(), len.clone()).prop_map(NdArray::from),
        prop::collection::vec(any::<u64>(), len.clone()).prop_map(NdArray::from),
    ];
    let others = prop_oneof![
        // Finite floats only: NaN never compares equal to itself
        prop::collection::vec(-1.0e6f32..1.0e6f32, len.clone()).prop_map(NdArray::from),
        prop::collection::vec(-1.0e12f64..1.0e12f64, len.clone()).prop_map(NdArray::from),
        prop::collection::vec("\\PC{0,12}", len).prop_map(NdArray::from),
    ];
    prop_oneof![4 => integers, 3 => others]
}

/// Send a table through the Flight encoder and decoder in memory.
fn through_flight_data(table: &Table) -> Table {
    futures::executor::block_on(async {
        let data = table_to_flight_data(table, None);
        collect_table(FlightRecordBatchStream::new_from_flight_data(data))
            .await
            .expect("flight data should decode")
    })
}

/// Generator for an array with an optional 2-D shape.
fn arb_array() -> impl Strategy<Value = NdArray> {
    (arb_values(), 1..5usize).prop_map(|(array, rows)| {
        let len = array.len();
        if len > 0 && len % rows == 0 {
            array
                .with_shape(vec![rows, len / rows])
                .expect("rows divides len")
        } else {
            array
        }
    })
}

/// Generator for a non-empty map of named arrays.
fn arb_array_map() -> impl Strategy<Value = ArrayMap> {
    prop::collection::btree_map("[a-z_][a-z0-9_]{0,10}", arb_array(), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_encode_decode_roundtrip(arrays in arb_array_map()) {
        let table = encode(&arrays).expect("encode should succeed");
        prop_assert_eq!(table.num_columns(), arrays.len());

        let decoded = decode(&table).expect("decode should succeed");
        prop_assert_eq!(&decoded, &arrays);
    }

    #[test]
    fn prop_flight_data_roundtrip(arrays in arb_array_map(), batch_bytes in 16..4096usize) {
        let table = encode_with_batch_size(&arrays, batch_bytes).expect("encode should succeed");
        let restored = through_flight_data(&table);
        let decoded = decode(&restored).expect("decode should succeed");

        for (name, original) in &arrays {
            let back = &decoded[name];
            prop_assert_eq!(back.dtype(), original.dtype());
            prop_assert_eq!(back.shape(), original.shape());
            prop_assert_eq!(back, original);
        }
    }

    #[test]
    fn prop_f64_bits_survive(values in prop::collection::vec(any::<f64>(), 0..64)) {
        let mut arrays = ArrayMap::new();
        arrays.insert("x".to_string(), NdArray::from(values.clone()));

        let decoded = decode(&through_flight_data(&encode(&arrays).unwrap())).unwrap();
        let back = decoded["x"].as_slice::<Float64Type>().unwrap();
        prop_assert_eq!(back.len(), values.len());
        for (a, b) in values.iter().zip(back) {
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn prop_f32_bits_survive(bits in prop::collection::vec(any::<u32>(), 0..64)) {
        // Every bit pattern, including signalling NaNs and subnormals
        let values: Vec<f32> = bits.iter().map(|b| f32::from_bits(*b)).collect();
        let mut arrays = ArrayMap::new();
        arrays.insert("x".to_string(), NdArray::from(values));

        let decoded = decode(&through_flight_data(&encode(&arrays).unwrap())).unwrap();
        let back: Vec<u32> = decoded["x"]
            .as_slice::<Float32Type>()
            .unwrap()
            .iter()
            .map(|v| v.to_bits())
            .collect();
        prop_assert_eq!(back, bits);
    }
}

#[test]
fn test_special_floats_are_bit_identical() {
    let specials = vec![
        f64::NAN,
        -f64::NAN,
        f64::from_bits(0x7ff4_0000_0000_0000),
        f64::INFINITY,
        f64::NEG_INFINITY,
        0.0,
        -0.0,
        f64::from_bits(1),
        -f64::from_bits(0x000f_ffff_ffff_ffff),
        f64::MIN_POSITIVE,
        f64::MAX,
    ];
    let mut arrays = ArrayMap::new();
    arrays.insert("f64".to_string(), NdArray::from(specials.clone()));
    arrays.insert(
        "f32".to_string(),
        NdArray::from(vec![f32::NAN, -0.0f32, f32::INFINITY, f32::from_bits(1)]),
    );

    let decoded = decode(&through_flight_data(&encode(&arrays).unwrap())).unwrap();
    let back = decoded["f64"].as_slice::<Float64Type>().unwrap();
    for (a, b) in specials.iter().zip(back) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    let back: Vec<u32> = decoded["f32"]
        .as_slice::<Float32Type>()
        .unwrap()
        .iter()
        .map(|v| v.to_bits())
        .collect();
    assert_eq!(back, vec![f32::NAN.to_bits(), 0x8000_0000, 0x7f80_0000, 1]);

    // Byte-wise equality: NaN payloads match, signed zeros do not.
    assert_eq!(decoded, arrays);
    assert_ne!(NdArray::from(vec![0.0f64]), NdArray::from(vec![-0.0f64]));
}

#[test]
fn test_overflowing_shape_is_an_error() {
    let result = NdArray::from(vec![1u8, 2, 3, 4]).with_shape(vec![usize::MAX / 2 + 1, 2, 2]);
    assert!(matches!(result, Err(FlightError::InvalidShape { .. })));

    let result = NdArray::from(Vec::<u8>::new()).with_shape(vec![usize::MAX, usize::MAX, 0]);
    assert!(matches!(result, Err(FlightError::InvalidShape { .. })));
}
