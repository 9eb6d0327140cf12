//! Tensor arithmetic and linear algebra

use particula_core::tests::test_helpers::{approx_eq, tensor_approx_eq};
use particula_core::{Func, Tensor, TensorError};

fn matrix(rows: usize, cols: usize, values: &[f64]) -> Tensor {
    Tensor::new(rows, cols, values).unwrap()
}

#[test]
fn test_determinant_and_trace_of_2x2() {
    let m = matrix(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    assert!(approx_eq(m.determinant().unwrap(), -2.0, 1e-12));
    assert!(approx_eq(m.trace().unwrap(), 5.0, 1e-12));
}

#[test]
fn test_determinant_of_3x3() {
    let m = matrix(3, 3, &[2.0, 0.0, 1.0, 1.0, 3.0, 2.0, 1.0, 1.0, 1.0]);
    // 2*(3-2) - 0 + 1*(1-3) = 0
    assert!(approx_eq(m.determinant().unwrap(), 0.0, 1e-12));
    let n = matrix(3, 3, &[1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 5.0, 6.0, 0.0]);
    assert!(approx_eq(n.determinant().unwrap(), 1.0, 1e-9));
}

#[test]
fn test_inverse_times_matrix_is_identity() {
    let m = matrix(2, 2, &[4.0, 7.0, 2.0, 6.0]);
    let inv = m.inverse().unwrap().unwrap();
    let product = m.try_mul(&inv).unwrap();
    assert!(tensor_approx_eq(&product, &Tensor::identity(2).unwrap(), 1e-12));

    let n = matrix(3, 3, &[1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 5.0, 6.0, 0.0]);
    let inv = n.inverse().unwrap().unwrap();
    let expected = matrix(3, 3, &[-24.0, 18.0, 5.0, 20.0, -15.0, -4.0, -5.0, 4.0, 1.0]);
    assert!(tensor_approx_eq(&inv, &expected, 1e-9));
}

#[test]
fn test_singular_inverse_is_none_and_inv_falls_back_to_identity() {
    let singular = matrix(2, 2, &[1.0, 2.0, 2.0, 4.0]);
    assert_eq!(singular.inverse().unwrap(), None);
    let result = Func::Inv.apply(&[singular]).unwrap();
    assert_eq!(result, Tensor::identity(2).unwrap());
}

#[test]
fn test_scalar_broadcasts_in_elementwise_ops() {
    let v = Tensor::vector(&[1.0, 2.0, 3.0]).unwrap();
    let sum = v.try_add(&Tensor::scalar(1.0)).unwrap();
    assert_eq!(sum, Tensor::vector(&[2.0, 3.0, 4.0]).unwrap());
    let scaled = Tensor::scalar(2.0).try_mul(&v).unwrap();
    assert_eq!(scaled, Tensor::vector(&[2.0, 4.0, 6.0]).unwrap());
}

#[test]
fn test_shape_mismatch_is_an_error() {
    let a = Tensor::vector(&[1.0, 2.0]).unwrap();
    let b = Tensor::vector(&[1.0, 2.0, 3.0]).unwrap();
    assert!(matches!(a.try_add(&b), Err(TensorError::ShapeMismatch { .. })));
    assert!(matches!(a.hadamard(&b), Err(TensorError::ShapeMismatch { .. })));
}

#[test]
fn test_division_requires_scalar_divisor() {
    let a = Tensor::vector(&[2.0, 4.0]).unwrap();
    assert_eq!(
        a.try_div(&Tensor::scalar(2.0)).unwrap(),
        Tensor::vector(&[1.0, 2.0]).unwrap()
    );
    assert!(matches!(a.try_div(&a), Err(TensorError::NonScalarDivisor((1, 2)))));
    // term-wise division accepts equal shapes
    assert_eq!(a.termwise_div(&a).unwrap(), Tensor::vector(&[1.0, 1.0]).unwrap());
}

#[test]
fn test_matrix_vector_product() {
    let m = matrix(2, 2, &[0.0, -1.0, 1.0, 0.0]);
    // vectors are rows: they multiply from the left
    let v = Tensor::vector(&[1.0, 0.0]).unwrap();
    assert_eq!(v.try_mul(&m).unwrap(), Tensor::vector(&[0.0, -1.0]).unwrap());
    assert!(m.try_mul(&v).is_err());

    let column: Tensor = "1|0".parse().unwrap();
    assert_eq!(m.try_mul(&column).unwrap(), matrix(2, 1, &[0.0, 1.0]));
}

#[test]
fn test_transpose_swaps_shape() {
    let m = matrix(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let t = m.transpose();
    assert_eq!(t.shape(), (3, 2));
    assert_eq!(t.get(2, 1).unwrap(), 6.0);
    assert_eq!(t.get(0, 1).unwrap(), 4.0);
}

#[test]
fn test_cross_products() {
    let x = Tensor::vector(&[1.0, 0.0, 0.0]).unwrap();
    let y = Tensor::vector(&[0.0, 1.0, 0.0]).unwrap();
    assert_eq!(x.cross(&y).unwrap(), Tensor::vector(&[0.0, 0.0, 1.0]).unwrap());

    let a = Tensor::vector(&[1.0, 0.0]).unwrap();
    let b = Tensor::vector(&[0.0, 2.0]).unwrap();
    assert_eq!(a.cross(&b).unwrap(), Tensor::scalar(2.0));
}

#[test]
fn test_eigenvalues_of_symmetric_matrix() {
    let m = matrix(2, 2, &[2.0, 1.0, 1.0, 2.0]);
    let (values, vectors) = m.eigen().unwrap();
    let mut found: Vec<f64> = values.as_slice().to_vec();
    found.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert!(approx_eq(found[0], 1.0, 1e-9));
    assert!(approx_eq(found[1], 3.0, 1e-9));

    // each column satisfies M v = lambda v
    for k in 0..2 {
        let v = Tensor::vector(&[vectors.get(0, k).unwrap(), vectors.get(1, k).unwrap()]).unwrap();
        let lambda = values.as_slice()[k];
        let mv = m.try_mul(&v.transpose()).unwrap().transpose();
        assert!(tensor_approx_eq(&mv, &(v * lambda), 1e-8));
    }
}

#[test]
fn test_literal_parsing_and_display() {
    let m: Tensor = "1;2;3|4;5;6".parse().unwrap();
    assert_eq!(m.shape(), (2, 3));
    assert_eq!(m.get(1, 0).unwrap(), 4.0);

    let v: Tensor = "1;2".parse().unwrap();
    assert_eq!(v.shape(), (1, 2));
    assert_eq!(v, Tensor::vector(&[1.0, 2.0]).unwrap());
    assert_eq!(v.to_string(), "1;2");

    let c: Tensor = "1|2".parse().unwrap();
    assert_eq!(c.shape(), (2, 1));
    assert_eq!(c, v.transpose());

    assert_eq!(m.to_string(), "1;2;3|4;5;6");
    assert!("1;2|3".parse::<Tensor>().is_err());
    assert!("1;2;3;4".parse::<Tensor>().is_err());
}

#[test]
fn test_shape_limit() {
    assert!(matches!(Tensor::zeros(4, 1), Err(TensorError::InvalidShape(4, 1))));
    assert!(Tensor::new(2, 2, &[1.0, 2.0, 3.0]).is_err());
}
